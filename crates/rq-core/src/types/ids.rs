use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    InvalidFormat { value: String },
    NotPositive { value: i64 },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat { value } => write!(f, "invalid id format: {value}"),
            Self::NotPositive { value } => write!(f, "id must be positive, got {value}"),
        }
    }
}

impl std::error::Error for IdError {}

macro_rules! row_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let parsed: i64 = value.trim().parse().map_err(|_| IdError::InvalidFormat {
                    value: value.to_string(),
                })?;
                if parsed <= 0 {
                    return Err(IdError::NotPositive { value: parsed });
                }
                Ok(Self(parsed))
            }
        }
    };
}

row_id!(JobId);
row_id!(RepoId);
row_id!(CommitId);
row_id!(ReviewId);
row_id!(ResponseId);
