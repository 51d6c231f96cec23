use std::fmt;

use serde::{Serialize, Serializer};

/// Malware family predicted for an APK. Integer codes are the training
/// labels of the five-category dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MalwareCategory {
    Adware,
    BankingTrojan,
    SmsMalware,
    Riskware,
    Benign,
    Unrecognized(i64),
}

impl MalwareCategory {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Adware,
            2 => Self::BankingTrojan,
            3 => Self::SmsMalware,
            4 => Self::Riskware,
            5 => Self::Benign,
            other => Self::Unrecognized(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Adware => 1,
            Self::BankingTrojan => 2,
            Self::SmsMalware => 3,
            Self::Riskware => 4,
            Self::Benign => 5,
            Self::Unrecognized(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Adware => "Adware",
            Self::BankingTrojan => "Banking",
            Self::SmsMalware => "SMS_MALWARE",
            Self::Riskware => "Riskware",
            Self::Benign => "Benign",
            Self::Unrecognized(_) => "Unrecognized",
        }
    }

    pub fn is_malicious(&self) -> bool {
        !matches!(self, Self::Benign | Self::Unrecognized(_))
    }

    /// Key used in per-class probability maps. Unknown codes keep their
    /// number so two of them never collide.
    pub fn probability_key(&self) -> String {
        match self {
            Self::Unrecognized(code) => format!("class_{code}"),
            known => known.name().to_string(),
        }
    }
}

impl fmt::Display for MalwareCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for MalwareCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
