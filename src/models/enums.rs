use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(BookletStatus {
    Active => "active",
    Completed => "completed",
    Archived => "archived",
});

str_enum!(RiskLevel {
    Low => "low",
    High => "high",
});

str_enum!(EntryType {
    PrenatalCheckup => "prenatal_checkup",
    PostnatalCheckup => "postnatal_checkup",
    Ultrasound => "ultrasound",
    LabReview => "lab_review",
    Consultation => "consultation",
    Emergency => "emergency",
    Delivery => "delivery",
    Other => "other",
});

str_enum!(Frequency {
    OnceDaily => "once_daily",
    TwiceDaily => "twice_daily",
    ThriceDaily => "thrice_daily",
    AsNeeded => "as_needed",
});

str_enum!(IntakeStatus {
    Taken => "taken",
    Missed => "missed",
    Skipped => "skipped",
});

str_enum!(LabStatus {
    Pending => "pending",
    Completed => "completed",
    Cancelled => "cancelled",
});

str_enum!(LabPriority {
    Routine => "routine",
    Urgent => "urgent",
    Stat => "stat",
});

impl Frequency {
    /// Expected doses per day. As-needed is stored as 4 by convention and
    /// contributes 4 expected slots to adherence like any other frequency.
    pub fn doses_per_day(&self) -> u32 {
        match self {
            Self::OnceDaily => 1,
            Self::TwiceDaily => 2,
            Self::ThriceDaily => 3,
            Self::AsNeeded => 4,
        }
    }

    pub fn from_doses_per_day(n: u32) -> Result<Self, DatabaseError> {
        match n {
            1 => Ok(Self::OnceDaily),
            2 => Ok(Self::TwiceDaily),
            3 => Ok(Self::ThriceDaily),
            4 => Ok(Self::AsNeeded),
            _ => Err(DatabaseError::InvalidEnum {
                field: "Frequency".into(),
                value: n.to_string(),
            }),
        }
    }
}

impl LabStatus {
    /// Completed and cancelled requests never return to pending.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn booklet_status_round_trip() {
        for (variant, s) in [
            (BookletStatus::Active, "active"),
            (BookletStatus::Completed, "completed"),
            (BookletStatus::Archived, "archived"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(BookletStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn entry_type_round_trip() {
        for (variant, s) in [
            (EntryType::PrenatalCheckup, "prenatal_checkup"),
            (EntryType::PostnatalCheckup, "postnatal_checkup"),
            (EntryType::Ultrasound, "ultrasound"),
            (EntryType::LabReview, "lab_review"),
            (EntryType::Consultation, "consultation"),
            (EntryType::Emergency, "emergency"),
            (EntryType::Delivery, "delivery"),
            (EntryType::Other, "other"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(EntryType::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn frequency_doses_per_day() {
        assert_eq!(Frequency::OnceDaily.doses_per_day(), 1);
        assert_eq!(Frequency::TwiceDaily.doses_per_day(), 2);
        assert_eq!(Frequency::ThriceDaily.doses_per_day(), 3);
        assert_eq!(Frequency::AsNeeded.doses_per_day(), 4);
        for n in 1..=4 {
            assert_eq!(
                Frequency::from_doses_per_day(n).unwrap().doses_per_day(),
                n
            );
        }
        assert!(Frequency::from_doses_per_day(0).is_err());
        assert!(Frequency::from_doses_per_day(5).is_err());
    }

    #[test]
    fn lab_status_terminal_set() {
        assert!(!LabStatus::Pending.is_terminal());
        assert!(LabStatus::Completed.is_terminal());
        assert!(LabStatus::Cancelled.is_terminal());
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(BookletStatus::from_str("open").is_err());
        assert!(IntakeStatus::from_str("unknown").is_err());
        assert!(LabPriority::from_str("").is_err());
    }
}
