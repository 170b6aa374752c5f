use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use crate::error::HarvestError;

/// Fault categories a failed task can fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Fault {
    /// Browser handle invalid or crashed
    SessionFault,
    /// Connection refused, reset or timed out
    NetworkFault,
    /// Descriptor, memory or thread limits hit
    ResourceExhaustion,
    /// Challenge page or throttling detected
    RateLimit,
}

const SESSION_KEYWORDS: &[&str] = &[
    "invalid session id",
    "session not created",
    "session deleted",
    "webdriver session not active",
    "chrome not reachable",
    "no such window",
    "target window already closed",
    "disconnected: not connected to devtools",
    "stale element reference",
];

const NETWORK_KEYWORDS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection aborted",
    "connection broken",
    "max retries exceeded",
    "newconnectionerror",
    "network is unreachable",
    "unreachable",
    "timed out",
    "timeout",
    "err_connection",
    "err_name_not_resolved",
    "err_internet_disconnected",
    "errno 111",
];

const RESOURCE_KEYWORDS: &[&str] = &[
    "too many open files",
    "errno 24",
    "resource temporarily unavailable",
    "cannot allocate memory",
    "out of memory",
    "thread limit",
];

const RATE_LIMIT_KEYWORDS: &[&str] = &[
    "anti-bot challenge",
    "captcha",
    "robot check",
    "unusual traffic",
    "too many requests",
    "http 429",
    "status 429",
    "access denied",
];

/// Set of faults matched by one failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSet {
    bits: u8,
}

impl FaultSet {
    const ALL: [Fault; 4] = [
        Fault::SessionFault,
        Fault::NetworkFault,
        Fault::ResourceExhaustion,
        Fault::RateLimit,
    ];

    fn bit(fault: Fault) -> u8 {
        match fault {
            Fault::SessionFault => 1,
            Fault::NetworkFault => 1 << 1,
            Fault::ResourceExhaustion => 1 << 2,
            Fault::RateLimit => 1 << 3,
        }
    }

    /// Create an empty set
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fault: Fault) {
        self.bits |= Self::bit(fault);
    }

    pub fn contains(&self, fault: Fault) -> bool {
        self.bits & Self::bit(fault) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Faults present in either set
    pub fn union(self, other: FaultSet) -> FaultSet {
        FaultSet {
            bits: self.bits | other.bits,
        }
    }

    /// Faults in declaration order
    pub fn iter(&self) -> impl Iterator<Item = Fault> + '_ {
        Self::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<Fault> for FaultSet {
    fn from_iter<I: IntoIterator<Item = Fault>>(iter: I) -> Self {
        let mut set = FaultSet::empty();
        for fault in iter {
            set.insert(fault);
        }
        set
    }
}

impl fmt::Display for FaultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "unclassified");
        }
        let names: Vec<String> = self.iter().map(|fault| format!("{:?}", fault)).collect();
        write!(f, "{}", names.join("+"))
    }
}

/// Classify raw failure text into fault categories.
///
/// Matching is case-insensitive and multi-label; text matching nothing
/// yields an empty set.
pub fn classify(text: &str) -> FaultSet {
    let lower = text.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    let mut faults = FaultSet::empty();
    if matches(SESSION_KEYWORDS) {
        faults.insert(Fault::SessionFault);
    }
    if matches(NETWORK_KEYWORDS) {
        faults.insert(Fault::NetworkFault);
    }
    if matches(RESOURCE_KEYWORDS) {
        faults.insert(Fault::ResourceExhaustion);
    }
    if matches(RATE_LIMIT_KEYWORDS) {
        faults.insert(Fault::RateLimit);
    }
    faults
}

/// Drop URLs so a product path can never contribute a keyword
fn strip_urls(text: &str) -> Cow<'_, str> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    match URL.get_or_init(|| Regex::new(r"(?i)\b(?:https?|wss?|file)://\S+").ok()) {
        Some(url) => url.replace_all(text, "<url>"),
        None => Cow::Borrowed(text),
    }
}

/// Text of one link in an error chain, without the parts naming a page
fn cause_text(cause: &(dyn std::error::Error + 'static)) -> String {
    match cause.downcast_ref::<HarvestError>() {
        Some(HarvestError::Timeout { .. }) => "timeout".to_string(),
        Some(HarvestError::MarkerTimeout { .. }) => "page marker wait timed out".to_string(),
        Some(HarvestError::Challenge { .. }) => "anti-bot challenge".to_string(),
        Some(HarvestError::SessionNotActive { .. }) => "webdriver session not active".to_string(),
        Some(HarvestError::Launch(message)) => format!("session not created: {}", strip_urls(message)),
        Some(HarvestError::Browser(message)) => strip_urls(message).into_owned(),
        None => strip_urls(&cause.to_string()).into_owned(),
    }
}

/// Classify an error using every cause in its chain.
///
/// URLs are removed before matching, so the task URL carried by context
/// messages never adds a label.
pub fn classify_error(error: &anyhow::Error) -> FaultSet {
    error
        .chain()
        .map(|cause| classify(&cause_text(cause)))
        .fold(FaultSet::empty(), FaultSet::union)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_single_category() {
        let faults = classify("Message: invalid session id");
        assert!(faults.contains(Fault::SessionFault));
        assert_eq!(faults.iter().count(), 1);

        assert_eq!(
            classify("OSError: [Errno 24] Too many open files").iter().collect::<Vec<_>>(),
            vec![Fault::ResourceExhaustion]
        );
    }

    #[test]
    fn test_multi_label() {
        let faults = classify("chrome not reachable: connection refused");
        assert!(faults.contains(Fault::SessionFault));
        assert!(faults.contains(Fault::NetworkFault));
        assert!(!faults.contains(Fault::RateLimit));
        assert_eq!(faults.to_string(), "SessionFault+NetworkFault");
    }

    #[test]
    fn test_unclassified() {
        let faults = classify("something odd happened");
        assert!(faults.is_empty());
        assert_eq!(faults.to_string(), "unclassified");
    }

    #[test]
    fn test_harvest_errors_are_classifiable() {
        let timeout = anyhow::Error::new(HarvestError::MarkerTimeout {
            url: "https://shop.example/p/1".to_string(),
            elapsed: Duration::from_secs(15),
        });
        assert!(classify_error(&timeout).contains(Fault::NetworkFault));

        let challenge = anyhow::Error::new(HarvestError::Challenge {
            url: "https://shop.example/p/1".to_string(),
        });
        assert!(classify_error(&challenge).contains(Fault::RateLimit));

        let inactive = anyhow::Error::new(HarvestError::SessionNotActive {
            state: "Invalid".to_string(),
        })
        .context("Failed to execute task");
        assert!(classify_error(&inactive).contains(Fault::SessionFault));
    }

    #[test]
    fn test_urls_do_not_add_labels() {
        let url = "https://shop.example/deals/captcha-timeout-unreachable";

        let plain = anyhow::anyhow!("layout changed unexpectedly").context(format!("Failed to execute task: {}", url));
        assert!(classify_error(&plain).is_empty());

        let challenge = anyhow::Error::new(HarvestError::Challenge { url: url.to_string() });
        assert_eq!(classify_error(&challenge).iter().collect::<Vec<_>>(), vec![Fault::RateLimit]);

        let navigation = anyhow::Error::new(HarvestError::Browser(format!("unknown error: net::ERR_CONNECTION_RESET at {}", url)))
            .context(format!("Failed to navigate to URL: {}", url));
        assert_eq!(classify_error(&navigation).iter().collect::<Vec<_>>(), vec![Fault::NetworkFault]);
    }
}
