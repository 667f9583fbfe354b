// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. https://github.com/emarsden/dash-mpd-rs/blob/6ebdfb4759adbda8233b5b3520804e23ff86e7de/src/fetch.rs#L435-L466

use regex::{Regex, Replacer};
use std::{collections::HashMap, sync::LazyLock};

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers."
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)(?:%0([\d])d)?\$")
        .expect("template pattern is valid")
});

/// Values substituted into a `SegmentTemplate@media` string.
#[derive(Debug, Default, Clone)]
pub struct Template<'a> {
    args: HashMap<&'a str, String>,
}

impl Template<'_> {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'static str, value: String) -> &mut Self {
        self.args.insert(key, value);
        self
    }

    pub fn insert_optional(&mut self, key: &'static str, value: Option<String>) -> &mut Self {
        if let Some(value) = value {
            self.args.insert(key, value);
        }
        self
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .to_string()
    }
}

struct TemplateReplacer<'a>(&'a HashMap<&'a str, String>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &regex::Captures<'_>, dst: &mut String) {
        let Some(value) = self.0.get(&caps[1]) else {
            dst.push_str(&caps[0]);
            return;
        };

        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(width) => dst.push_str(&format!("{value:0>width$}")),
            None => dst.push_str(value),
        }
    }
}

/// A media URL that still contains template identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateUrl(pub String);

impl TemplateUrl {
    /// Substitutes every known identifier, the result is parsed when the segment is probed.
    pub fn resolve(&self, template: &Template) -> String {
        template.resolve(&self.0)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.0.contains(&format!("${identifier}"))
    }
}
