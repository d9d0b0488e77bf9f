use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::codec::Labels;

/// A predicate on one label of a point.
///
/// For `Eq`, `Ne`, `In` and `NotIn` an absent label reads as the empty string,
/// so `Ne("host", "a")` also matches points without a `host` label. Combine with
/// [`LabelExpr::Exists`] to require presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LabelExpr {
    /// Label value equals `value`.
    Eq {
        /// Label key.
        key: String,
        /// Expected value.
        value: String,
    },
    /// Label value differs from `value`.
    Ne {
        /// Label key.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// Label value is one of `values`.
    In {
        /// Label key.
        key: String,
        /// Accepted values.
        values: BTreeSet<String>,
    },
    /// Label value is none of `values`.
    NotIn {
        /// Label key.
        key: String,
        /// Rejected values.
        values: BTreeSet<String>,
    },
    /// The label is present, with any value.
    Exists {
        /// Label key.
        key: String,
    },
    /// The label is absent.
    NotExists {
        /// Label key.
        key: String,
    },
}

impl LabelExpr {
    /// `key = value`.
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `key != value`.
    pub fn not_equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Ne {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `key in (values..)`.
    pub fn is_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `key not in (values..)`.
    pub fn not_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::NotIn {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `key exists`.
    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists { key: key.into() }
    }

    /// `key not exists`.
    pub fn not_exists(key: impl Into<String>) -> Self {
        Self::NotExists { key: key.into() }
    }

    /// Label key the expression inspects.
    pub fn key(&self) -> &str {
        match self {
            Self::Eq { key, .. }
            | Self::Ne { key, .. }
            | Self::In { key, .. }
            | Self::NotIn { key, .. }
            | Self::Exists { key }
            | Self::NotExists { key } => key,
        }
    }

    /// Evaluates the expression against a point's labels.
    pub fn matches(&self, labels: &Labels) -> bool {
        let value = || labels.get(self.key()).map_or("", String::as_str);
        match self {
            Self::Eq { value: expected, .. } => value() == expected.as_str(),
            Self::Ne { value: rejected, .. } => value() != rejected.as_str(),
            Self::In { values, .. } => values.contains(value()),
            Self::NotIn { values, .. } => !values.contains(value()),
            Self::Exists { key } => labels.contains_key(key),
            Self::NotExists { key } => !labels.contains_key(key),
        }
    }
}

/// True when every expression matches. An empty list matches everything.
pub fn matches_all(exprs: &[LabelExpr], labels: &Labels) -> bool {
    exprs.iter().all(|expr| expr.matches(labels))
}
