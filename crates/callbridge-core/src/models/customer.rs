//! Customer record returned by the CRM lookup collaborator

use serde::{Deserialize, Serialize};

/// The subset of a CRM customer needed to build a caller-ID name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CustomerRecord {
    pub phone: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl CustomerRecord {
    /// Caller-ID name text: `organization:last_namefirst_name`
    pub fn caller_id_name(&self) -> String {
        format!(
            "{}:{}{}",
            self.organization.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default(),
            self.first_name.as_deref().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_id_name() {
        let record = CustomerRecord {
            phone: "0312345678".into(),
            organization: Some("Acme".into()),
            last_name: Some("Yamada".into()),
            first_name: Some("Taro".into()),
        };
        assert_eq!(record.caller_id_name(), "Acme:YamadaTaro");

        let bare = CustomerRecord {
            phone: "0312345678".into(),
            ..Default::default()
        };
        assert_eq!(bare.caller_id_name(), ":");
    }
}
