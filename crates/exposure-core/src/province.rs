//! Province of residence, reported in operational telemetry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Two-letter province codes, plus `EX` for users living abroad.
pub const PROVINCE_CODES: [&str; 108] = [
    "AG", "AL", "AN", "AO", "AR", "AP", "AT", "AV", "BT", "BA", "BL", "BN", "BG", "BI", "BO",
    "BZ", "BS", "BR", "CA", "CL", "CB", "CE", "CT", "CZ", "CH", "CO", "CS", "CR", "KR", "CN",
    "EN", "FM", "FE", "FI", "FG", "FC", "FR", "GE", "GO", "GR", "IM", "IS", "AQ", "SP", "LT",
    "LE", "LC", "LI", "LO", "LU", "MC", "MN", "MS", "MT", "ME", "MI", "MO", "MB", "NA", "NO",
    "NU", "OR", "PD", "PA", "PR", "PV", "PG", "PU", "PE", "PC", "PI", "PT", "PN", "PZ", "PO",
    "RG", "RA", "RC", "RE", "RI", "RN", "RM", "RO", "SA", "SS", "SV", "SI", "SR", "SO", "SU",
    "TA", "TE", "TR", "TO", "TP", "TN", "TV", "TS", "UD", "VA", "VE", "VB", "VC", "VR", "VV",
    "VI", "VT", "EX",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Province(String);

impl Province {
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Province at `index`, wrapping around the list.
    pub fn nth(index: usize) -> Province {
        Province(PROVINCE_CODES[index % PROVINCE_CODES.len()].to_string())
    }
}

impl FromStr for Province {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        if PROVINCE_CODES.contains(&code.as_str()) {
            Ok(Province(code))
        } else {
            Err(ConfigError::InvalidValue {
                key: "province".into(),
                message: format!("unknown province code '{s}'"),
            })
        }
    }
}

impl TryFrom<String> for Province {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Province> for String {
    fn from(province: Province) -> Self {
        province.0
    }
}

impl fmt::Display for Province {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_codes_only() {
        assert_eq!("rm".parse::<Province>().unwrap().code(), "RM");
        assert!("XX".parse::<Province>().is_err());
        assert!(serde_json::from_str::<Province>("\"ZZ\"").is_err());
    }

    #[test]
    fn nth_wraps() {
        assert_eq!(Province::nth(0).code(), "AG");
        assert_eq!(Province::nth(PROVINCE_CODES.len()), Province::nth(0));
    }
}
