use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use super::calendar;
use super::error::{Result, StoreError};

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Lowercase name as stored in the database.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(StoreError::invalid_value(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|err: StoreError| FromSqlError::Other(Box::new(err)))
            }
        }
    };
}

text_enum!(
    /// Resolution of `time_value`.
    TimeType {
        /// `YYYYMMDD` days.
        Day => "day",
        /// `YYYYWW` MMWR epiweeks.
        Week => "week",
    }
);

text_enum!(
    /// Kind of geographic unit a `geo_value` names.
    GeoType {
        /// FIPS county.
        County => "county",
        /// Hospital referral region.
        Hrr => "hrr",
        /// HHS region.
        Hhs => "hhs",
        /// Metropolitan statistical area.
        Msa => "msa",
        /// Designated market area.
        Dma => "dma",
        /// US state.
        State => "state",
        /// Whole nation.
        Nation => "nation",
    }
);

/// Reason a value, stderr or sample size is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Missingness {
    /// Present.
    #[default]
    NotMissing = 0,
    /// Does not apply to this signal.
    NotApplicable = 1,
    /// Excluded for this region.
    RegionException = 2,
    /// Withheld for privacy.
    Censored = 3,
    /// Removed after publication.
    Deleted = 4,
    /// Any other reason.
    Other = 5,
}

impl TryFrom<u8> for Missingness {
    type Error = StoreError;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Missingness::NotMissing,
            1 => Missingness::NotApplicable,
            2 => Missingness::RegionException,
            3 => Missingness::Censored,
            4 => Missingness::Deleted,
            5 => Missingness::Other,
            other => {
                return Err(StoreError::invalid_value(format!(
                    "unknown missingness code {other}"
                )))
            }
        })
    }
}

impl From<Missingness> for u8 {
    fn from(value: Missingness) -> Self {
        value as u8
    }
}

impl ToSql for Missingness {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as u8))
    }
}

impl FromSql for Missingness {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = u8::try_from(value.as_i64()?).map_err(|_| FromSqlError::InvalidType)?;
        Missingness::try_from(code).map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/// Identifies one logical metric across issues.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    /// Data source id.
    pub source: String,
    /// Signal id within the source.
    pub signal: String,
    /// Resolution of `time_value`.
    pub time_type: TimeType,
    /// Geographic unit kind.
    pub geo_type: GeoType,
    /// Location code within `geo_type`.
    pub geo_value: String,
    /// Day or epiweek the value describes.
    pub time_value: i64,
}

/// Identifies one immutable version of a metric.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FullKey {
    /// The metric being versioned.
    pub key: NaturalKey,
    /// Version marker.
    pub issue: i64,
}

impl NaturalKey {
    /// Pairs this key with an issue.
    pub fn at_issue(&self, issue: i64) -> FullKey {
        FullKey {
            key: self.clone(),
            issue,
        }
    }
}

/// One observation as handed to the staging loader.
///
/// `lag` and the ingestion timestamp are derived during validation.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationDraft {
    pub source: String,
    pub signal: String,
    pub time_type: TimeType,
    pub geo_type: GeoType,
    pub geo_value: String,
    pub time_value: i64,
    pub issue: i64,
    pub value: Option<f64>,
    pub stderr: Option<f64>,
    pub sample_size: Option<f64>,
    #[serde(default)]
    pub missing_value: Missingness,
    #[serde(default)]
    pub missing_stderr: Missingness,
    #[serde(default)]
    pub missing_sample_size: Missingness,
}

impl ObservationDraft {
    /// Natural key of this draft.
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            source: self.source.clone(),
            signal: self.signal.clone(),
            time_type: self.time_type,
            geo_type: self.geo_type,
            geo_value: self.geo_value.clone(),
            time_value: self.time_value,
        }
    }

    /// Checks field contents and derives `lag`.
    ///
    /// `index` is the draft's position in the load input and is reported back
    /// on failure.
    pub fn validate(self, index: usize) -> Result<SignalObservation> {
        let fail = |reason: String| StoreError::invalid_observation(index, reason);
        for (name, text) in [
            ("source", &self.source),
            ("signal", &self.signal),
            ("geo_value", &self.geo_value),
        ] {
            if text.trim().is_empty() {
                return Err(fail(format!("{name} is empty")));
            }
        }
        if self.issue < self.time_value {
            return Err(fail(format!(
                "issue {} precedes time_value {}",
                self.issue, self.time_value
            )));
        }
        for (name, number, missing) in [
            ("value", self.value, self.missing_value),
            ("stderr", self.stderr, self.missing_stderr),
            ("sample_size", self.sample_size, self.missing_sample_size),
        ] {
            match number {
                Some(n) if !n.is_finite() => return Err(fail(format!("{name} is not finite"))),
                None if missing == Missingness::NotMissing => {
                    return Err(fail(format!("{name} is null but flagged as not missing")))
                }
                _ => {}
            }
        }
        let lag = calendar::lag(self.time_type, self.time_value, self.issue)
            .map_err(|err| fail(err.to_string()))?;
        Ok(SignalObservation { draft: self, lag })
    }
}

/// A validated observation ready for staging.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalObservation {
    /// The checked draft.
    pub draft: ObservationDraft,
    /// `issue - time_value` in days or epiweeks.
    pub lag: i64,
}

/// One row read back from the history store or the latest projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredObservation {
    /// Surrogate id minted by the staging sequence.
    pub signal_data_id: i64,
    /// Natural key of the row.
    pub key: NaturalKey,
    /// Version marker.
    pub issue: i64,
    /// `issue - time_value` in days or epiweeks.
    pub lag: i64,
    /// Reported value.
    pub value: Option<f64>,
    /// Standard error of `value`.
    pub stderr: Option<f64>,
    /// Sample size behind `value`.
    pub sample_size: Option<f64>,
    /// Why `value` is absent.
    pub missing_value: Missingness,
    /// Why `stderr` is absent.
    pub missing_stderr: Missingness,
    /// Why `sample_size` is absent.
    pub missing_sample_size: Missingness,
    /// Epoch seconds when this version was staged.
    pub value_updated_timestamp: i64,
}
