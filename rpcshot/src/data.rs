// Copyright 2025 Oxide Computer Company
//! Filter, paging and page types shared by services and clients

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// Free-form key/value filter.  Keys keep their insertion order so that a
/// client sends them in the order they were added.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FilterParams(IndexMap<String, String>);

impl FilterParams {
    pub fn new() -> Self {
        FilterParams::default()
    }

    pub fn from_tuples<I, K, V>(tuples: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        FilterParams(
            tuples.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.shift_remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Position and size of a requested page.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct PagingParams {
    /** number of items to skip */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
    /** maximum number of items to return */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<i64>,
    /** whether the page should report the total item count */
    #[serde(default)]
    pub total: bool,
}

impl PagingParams {
    pub fn new(skip: Option<i64>, take: Option<i64>, total: bool) -> Self {
        PagingParams { skip, take, total }
    }

    /// Parses the `skip`, `take` and `total` strings of a request.  Values
    /// that don't parse are treated as absent.
    pub fn from_strings(
        skip: Option<&str>,
        take: Option<&str>,
        total: Option<&str>,
    ) -> Self {
        let number = |s: Option<&str>| s.and_then(|s| s.trim().parse::<i64>().ok());
        let total = total.is_some_and(|t| {
            matches!(t.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        });
        PagingParams { skip: number(skip), take: number(take), total }
    }

    /// Skip value, never negative.
    pub fn skip_or(&self, default: i64) -> i64 {
        self.skip.unwrap_or(default).max(0)
    }

    /// Take value, clamped to `1..=max_take`.
    pub fn take_or(&self, max_take: i64) -> i64 {
        self.take.unwrap_or(max_take).clamp(1, max_take.max(1))
    }
}

/// One page of results.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DataPage<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl<T> DataPage<T> {
    pub fn new(data: Vec<T>, total: Option<i64>) -> Self {
        DataPage { data, total }
    }
}

impl<T> Default for DataPage<T> {
    fn default() -> Self {
        DataPage { data: Vec::new(), total: None }
    }
}
