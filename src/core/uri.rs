//! Resource URIs used in notification subjects and bodies

use std::fmt::Display;

/// Builds public URIs for ledger resources under a base URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUris {
    base: String,
}

impl ResourceUris {
    /// Create a builder; a trailing slash on `base` is ignored
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        ResourceUris {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn account(&self, name: &str) -> String {
        format!("{}/accounts/{}", self.base, name)
    }

    pub fn transfer(&self, id: &impl Display) -> String {
        format!("{}/transfers/{}", self.base, id)
    }

    pub fn subscription(&self, id: &impl Display) -> String {
        format!("{}/subscriptions/{}", self.base, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://ledger.example")]
    #[case("http://ledger.example/")]
    fn test_account_uri(#[case] base: &str) {
        let uris = ResourceUris::new(base);
        assert_eq!(uris.account("alice"), "http://ledger.example/accounts/alice");
    }

    #[test]
    fn test_transfer_and_subscription_uris() {
        let uris = ResourceUris::new("http://ledger.example");
        assert_eq!(uris.transfer(&"t1"), "http://ledger.example/transfers/t1");
        assert_eq!(
            uris.subscription(&"s1"),
            "http://ledger.example/subscriptions/s1"
        );
    }
}
