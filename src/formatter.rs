//! Model of the debugger-wide data formatter configuration
//!
//! The debugger keeps type formats, summaries, filters, synthetic child
//! providers and a max-children display limit as global state shared by
//! every inspection. [`FormatterConfig`] mirrors that state from the raw
//! commands the driver issues, so teardown can reset it and report whether
//! the debugger is back at baseline.

use std::collections::BTreeSet;
use std::fmt;

/// Default `target.max-children-count` of lldb
pub const DEFAULT_MAX_CHILDREN: u32 = 256;

const MAX_CHILDREN_SETTING: &str = "target.max-children-count";

/// One category of per-type formatter entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatterCategory {
    Format,
    Summary,
    Filter,
    Synthetic,
}

impl FormatterCategory {
    pub const ALL: [FormatterCategory; 4] = [
        FormatterCategory::Format,
        FormatterCategory::Summary,
        FormatterCategory::Filter,
        FormatterCategory::Synthetic,
    ];

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "format" => Some(Self::Format),
            "summary" => Some(Self::Summary),
            "filter" => Some(Self::Filter),
            "synthetic" | "synth" => Some(Self::Synthetic),
            _ => None,
        }
    }

    /// Keyword used on the lldb command line
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Summary => "summary",
            Self::Filter => "filter",
            Self::Synthetic => "synth",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FormatterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Observed formatter state of one debugger instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatterConfig {
    entries: [BTreeSet<String>; 4],
    max_children_count: u32,
    baseline_max_children: u32,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHILDREN)
    }
}

impl FormatterConfig {
    /// Fresh configuration at baseline
    pub fn new(baseline_max_children: u32) -> Self {
        Self {
            entries: Default::default(),
            max_children_count: baseline_max_children,
            baseline_max_children,
        }
    }

    pub fn max_children_count(&self) -> u32 {
        self.max_children_count
    }

    pub fn baseline_max_children(&self) -> u32 {
        self.baseline_max_children
    }

    /// Type names with a custom entry in `category`
    pub fn entries(&self, category: FormatterCategory) -> impl Iterator<Item = &str> {
        self.entries[category.index()].iter().map(String::as_str)
    }

    /// Whether no custom entry exists and the limit is at baseline
    pub fn is_baseline(&self) -> bool {
        self.entries.iter().all(BTreeSet::is_empty)
            && self.max_children_count == self.baseline_max_children
    }

    /// Return to baseline. Idempotent.
    pub fn reset(&mut self) {
        for set in &mut self.entries {
            set.clear();
        }
        self.max_children_count = self.baseline_max_children;
    }

    /// Commands that restore the debugger to baseline
    ///
    /// Always the full list, independent of what was observed: the debugger
    /// may hold state this model never saw.
    pub fn reset_commands(&self) -> Vec<String> {
        FormatterCategory::ALL
            .iter()
            .map(|c| format!("type {} clear", c.keyword()))
            .chain(std::iter::once(format!(
                "settings set {} {}",
                MAX_CHILDREN_SETTING, self.baseline_max_children
            )))
            .collect()
    }

    /// Update the model from a raw debugger command
    ///
    /// Returns true when the command touched formatter state. Commands the
    /// model does not understand are ignored.
    pub fn observe(&mut self, command: &str) -> bool {
        let words = split_words(command);
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        match words.as_slice() {
            ["type", category, action, rest @ ..] => {
                let Some(category) = FormatterCategory::from_keyword(category) else {
                    return false;
                };
                let set = &mut self.entries[category.index()];
                match *action {
                    "clear" => set.clear(),
                    "add" => match type_name(rest) {
                        Some(name) => {
                            set.insert(name.to_string());
                        }
                        None => return false,
                    },
                    "delete" => match type_name(rest) {
                        Some(name) => {
                            set.remove(name);
                        }
                        None => return false,
                    },
                    _ => return false,
                }
                true
            }
            ["settings", "set", setting, value] if *setting == MAX_CHILDREN_SETTING => {
                match value.parse() {
                    Ok(n) => {
                        self.max_children_count = n;
                        true
                    }
                    Err(_) => false,
                }
            }
            ["settings", "clear", setting] if *setting == MAX_CHILDREN_SETTING => {
                self.max_children_count = DEFAULT_MAX_CHILDREN;
                true
            }
            _ => false,
        }
    }
}

/// Type names follow the options, so the last word is the name
fn type_name<'a>(rest: &[&'a str]) -> Option<&'a str> {
    rest.last().copied().filter(|w| !w.starts_with('-'))
}

/// Split a command line into words, honouring double and single quotes
fn split_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    let mut chars = command.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
