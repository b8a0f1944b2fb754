//! Device filters and action rules.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::device::{DeviceRecord, EventKind};

/// Expected property values a device must carry.
///
/// An empty filter matches every device. Otherwise every listed key must be
/// present on the device with exactly the listed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFilter(BTreeMap<String, String>);

impl DeviceFilter {
    /// A filter that matches every device.
    #[must_use]
    pub const fn any() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds a required property, returning the updated filter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Whether the filter has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The property names the filter constrains.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Exact match on every listed property.
    #[must_use]
    pub fn matches(&self, device: &DeviceRecord) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| device.property(key) == Some(expected.as_str()))
    }

    /// Case-insensitive match on every listed property.
    #[must_use]
    pub fn matches_ignore_case(&self, device: &DeviceRecord) -> bool {
        self.0.iter().all(|(key, expected)| {
            device
                .property(key)
                .is_some_and(|actual| actual.eq_ignore_ascii_case(expected))
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A filter plus the scripts to run for each event kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionRule {
    /// Name used in logs and passed to scripts as `ADBSTATUS_RULE`.
    pub name: Option<String>,
    /// Which devices the rule applies to.
    #[serde(rename = "device")]
    pub filter: DeviceFilter,
    /// Run when a matching device appears.
    pub connect: Option<String>,
    /// Run when a matching device disappears.
    pub disconnect: Option<String>,
    /// Run for each matching device when the host sleeps.
    pub sleep: Option<String>,
    /// Run for each matching device when the host wakes.
    pub wake: Option<String>,
}

impl ActionRule {
    /// A rule with the given filter and no scripts.
    #[must_use]
    pub fn new(filter: DeviceFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the script for one event kind.
    #[must_use]
    pub fn on(mut self, kind: EventKind, script: impl Into<String>) -> Self {
        let slot = match kind {
            EventKind::Connect => &mut self.connect,
            EventKind::Disconnect => &mut self.disconnect,
            EventKind::Sleep => &mut self.sleep,
            EventKind::Wake => &mut self.wake,
        };
        *slot = Some(script.into());
        self
    }

    /// The script for an event kind, ignoring blank ones.
    #[must_use]
    pub fn script(&self, kind: EventKind) -> Option<&str> {
        let script = match kind {
            EventKind::Connect => self.connect.as_deref(),
            EventKind::Disconnect => self.disconnect.as_deref(),
            EventKind::Sleep => self.sleep.as_deref(),
            EventKind::Wake => self.wake.as_deref(),
        };
        script.filter(|s| !s.trim().is_empty())
    }

    /// Whether at least one script is set.
    #[must_use]
    pub fn has_any_script(&self) -> bool {
        [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::Sleep,
            EventKind::Wake,
        ]
        .into_iter()
        .any(|kind| self.script(kind).is_some())
    }

    /// The rule's name, or `rule#<index>` when unnamed.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("rule#{index}"))
    }
}

/// One script selected for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected<'a> {
    /// Label of the rule the script came from.
    pub rule: String,
    /// Script text.
    pub script: &'a str,
}

/// The configured rules, in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ActionRule>,
    unique_scripts: bool,
}

impl RuleSet {
    /// Wraps rules. With `unique_scripts`, identical script text from several
    /// matching rules is selected once per device and event.
    #[must_use]
    pub const fn new(rules: Vec<ActionRule>, unique_scripts: bool) -> Self {
        Self {
            rules,
            unique_scripts,
        }
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Scripts to run for `device` on `kind`, in rule order.
    #[must_use]
    pub fn select(&self, device: &DeviceRecord, kind: EventKind) -> Vec<Selected<'_>> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.filter.matches(device))
            .filter_map(|(index, rule)| {
                rule.script(kind).map(|script| Selected {
                    rule: rule.label(index),
                    script,
                })
            })
            .filter(|selected| !self.unique_scripts || seen.insert(selected.script))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceState;

    fn pixel() -> DeviceRecord {
        DeviceRecord::new("R58M123ABC", DeviceState::Device)
            .with_property("model", "Pixel_7")
            .with_property("product", "panther")
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = DeviceFilter::any();
        assert!(filter.matches(&pixel()));
        assert!(filter.matches(&DeviceRecord::new("x", DeviceState::Offline)));
    }

    #[test]
    fn test_filter_requires_every_key() {
        let full = DeviceFilter::any()
            .with("model", "Pixel_7")
            .with("product", "panther");
        assert!(full.matches(&pixel()));

        let partial_mismatch = DeviceFilter::any()
            .with("model", "Pixel_7")
            .with("product", "oriole");
        assert!(!partial_mismatch.matches(&pixel()));

        let missing_key = DeviceFilter::any().with("transport_id", "3");
        assert!(!missing_key.matches(&pixel()));
    }

    #[test]
    fn test_filter_on_serial_and_state() {
        let filter: DeviceFilter = [("serial", "R58M123ABC"), ("state", "device")]
            .into_iter()
            .collect();
        assert!(filter.matches(&pixel()));
        assert!(!filter.matches(&pixel().into_absent()));
    }

    #[test]
    fn test_case_insensitive_matching() {
        let filter = DeviceFilter::any().with("model", "pixel_7");
        assert!(!filter.matches(&pixel()));
        assert!(filter.matches_ignore_case(&pixel()));
    }

    #[test]
    fn test_select_in_rule_order() {
        let rules = RuleSet::new(
            vec![
                ActionRule::new(DeviceFilter::any()).on(EventKind::Connect, "echo one"),
                ActionRule::new(DeviceFilter::any().with("model", "Other"))
                    .on(EventKind::Connect, "echo skipped"),
                ActionRule::new(DeviceFilter::any().with("model", "Pixel_7"))
                    .named("pixel")
                    .on(EventKind::Connect, "echo two")
                    .on(EventKind::Sleep, "echo zz"),
            ],
            false,
        );

        let selected = rules.select(&pixel(), EventKind::Connect);
        assert_eq!(
            selected,
            vec![
                Selected { rule: "rule#0".into(), script: "echo one" },
                Selected { rule: "pixel".into(), script: "echo two" },
            ]
        );
        assert!(rules.select(&pixel(), EventKind::Disconnect).is_empty());
    }

    #[test]
    fn test_unique_scripts_dedupes_identical_text() {
        let rule = || ActionRule::new(DeviceFilter::any()).on(EventKind::Wake, "echo up");
        let all = RuleSet::new(vec![rule(), rule()], false);
        let unique = RuleSet::new(vec![rule(), rule()], true);
        assert_eq!(all.select(&pixel(), EventKind::Wake).len(), 2);
        assert_eq!(unique.select(&pixel(), EventKind::Wake).len(), 1);
    }

    #[test]
    fn test_blank_script_is_ignored() {
        let rule = ActionRule::new(DeviceFilter::any()).on(EventKind::Connect, "   ");
        assert!(!rule.has_any_script());
        assert_eq!(rule.script(EventKind::Connect), None);
    }
}
