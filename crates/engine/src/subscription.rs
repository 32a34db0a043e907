// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The result of the subscription handshake: an observable plus the index
//! space metadata combining operators negotiate with.
//!
//! A source may declare a [`Base`], a tag for the index space of its
//! elements. Two flowables sharing a base can be matched element-wise with no
//! runtime comparison. When bases differ, a selector registered for the other
//! side's base vouches that the indexes line up; combining operators merge
//! the selector maps of both sides while subscribing.

use crate::observable::ObservableRef;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tag describing the index space of a source's elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Base {
    /// A source known to emit exactly `n` elements.
    Numerical(usize),
    /// A named index space.
    Named(Arc<str>),
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Base::Numerical(n) => write!(f, "numerical({n})"),
            Base::Named(name) => write!(f, "named({name})"),
        }
    }
}

/// Message emitted by a selector flowable to align one index space onto
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMessage {
    /// The next element of the selected side participates.
    SelectNext,
    /// The current selection group is complete.
    SelectCompleted,
}

/// A selector stream registered for a foreign base.
pub type SelectorRef = ObservableRef<SelectorMessage>;

/// Base and selector map attached to a subscription.
#[derive(Clone, Default)]
pub struct BaseAndSelectors {
    /// The index space of the subscribed observable, if declared.
    pub base: Option<Base>,
    /// Selectors keyed by the foreign base they align with.
    pub selectors: HashMap<Base, SelectorRef>,
}

impl BaseAndSelectors {
    /// Metadata without a base.
    #[must_use]
    pub fn none() -> Self {
        BaseAndSelectors::default()
    }

    /// Metadata with a declared base and no selectors.
    #[must_use]
    pub fn with_base(base: Base) -> Self {
        BaseAndSelectors {
            base: Some(base),
            selectors: HashMap::new(),
        }
    }

    /// Registers a selector for a foreign base.
    pub fn register_selector(&mut self, base: Base, selector: SelectorRef) {
        let _ = self.selectors.insert(base, selector);
    }

    /// Whether this side can be matched element-wise against `other`.
    ///
    /// True when both bases are equal, or when either side carries a selector
    /// entry for the other's base.
    #[must_use]
    pub fn matches(&self, other: &BaseAndSelectors) -> bool {
        match (&self.base, &other.base) {
            (Some(left), Some(right)) => {
                left == right
                    || self.selectors.contains_key(right)
                    || other.selectors.contains_key(left)
            }
            _ => false,
        }
    }

    /// Merges the metadata of two matched sides.
    ///
    /// The merged subscription keeps the left base (both are aligned at this
    /// point) and the union of both selector maps, so later consumers can
    /// reuse the matching decisions.
    #[must_use]
    pub fn merge(mut self, other: BaseAndSelectors) -> BaseAndSelectors {
        for (base, selector) in other.selectors {
            let _ = self.selectors.entry(base).or_insert(selector);
        }
        if self.base.is_none() {
            self.base = other.base;
        }
        self
    }

    fn describe(&self) -> String {
        self.base
            .as_ref()
            .map_or_else(|| "<none>".to_owned(), ToString::to_string)
    }
}

impl fmt::Debug for BaseAndSelectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseAndSelectors")
            .field("base", &self.describe())
            .field("selectors", &self.selectors.len())
            .finish()
    }
}

/// An observable paired with its index space metadata, returned from
/// `unsafe_subscribe`.
pub struct FlowSubscription<T> {
    /// The observable to install an observer on.
    pub observable: ObservableRef<T>,
    /// Base and selector metadata of the observable.
    pub info: BaseAndSelectors,
}

impl<T> FlowSubscription<T> {
    /// A subscription with no base metadata.
    #[must_use]
    pub fn new(observable: ObservableRef<T>) -> Self {
        FlowSubscription {
            observable,
            info: BaseAndSelectors::none(),
        }
    }

    /// A subscription with metadata.
    #[must_use]
    pub fn with_info(observable: ObservableRef<T>, info: BaseAndSelectors) -> Self {
        FlowSubscription { observable, info }
    }
}
