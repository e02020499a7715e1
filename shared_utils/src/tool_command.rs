//! Command Templates - 外部工具命令模板
//!
//! A template is a program plus arguments in which `{name}` tokens are
//! substituted per invocation:
//!
//! ```
//! use shared_utils::tool_command::{CommandTemplate, Placeholders};
//!
//! let template = CommandTemplate::parse("adderinfo -i {events} -d").unwrap();
//! let mut values = Placeholders::new();
//! values.insert("events", "/dev/shm/run/events.adder");
//! let rendered = template.render(&values).unwrap();
//! assert_eq!(rendered.args, vec!["-i", "/dev/shm/run/events.adder", "-d"]);
//! ```
//!
//! The template text is split on whitespace BEFORE substitution, so a
//! substituted path containing spaces stays a single argument.

use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("command template is empty")]
    Empty,

    #[error("unknown placeholder {{{name}}} in command template '{template}'")]
    UnknownPlaceholder { name: String, template: String },

    #[error("no value supplied for placeholder {{{name}}}")]
    MissingValue { name: String },
}

/// Values substituted into a [`CommandTemplate`].
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, value: impl Into<String>) -> &mut Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut parts = text.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(TemplateError::Empty)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Names of every placeholder used, in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .flat_map(|part| tokens(part).into_iter().map(|(_, _, name)| name.to_string()))
            .collect()
    }

    /// Reject placeholders outside `allowed` so a typo fails at startup
    /// instead of on the first work item.
    pub fn validate(&self, allowed: &[&str]) -> Result<(), TemplateError> {
        match self
            .placeholders()
            .into_iter()
            .find(|name| !allowed.contains(&name.as_str()))
        {
            Some(name) => Err(TemplateError::UnknownPlaceholder {
                name,
                template: self.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn uses(&self, name: &str) -> bool {
        self.placeholders().iter().any(|p| p == name)
    }

    pub fn render(&self, values: &Placeholders) -> Result<RenderedCommand, TemplateError> {
        Ok(RenderedCommand {
            program: substitute(&self.program, values)?,
            args: self
                .args
                .iter()
                .map(|arg| substitute(arg, values))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A template with every placeholder filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RenderedCommand {
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// `(start, end, name)` for each `{name}` token; `end` is exclusive.
fn tokens(part: &str) -> Vec<(usize, usize, &str)> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(open) = part[offset..].find('{') {
        let start = offset + open;
        let Some(close) = part[start..].find('}') else {
            break;
        };
        let end = start + close + 1;
        let name = &part[start + 1..end - 1];
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            found.push((start, end, name));
            offset = end;
        } else {
            offset = start + 1;
        }
    }
    found
}

fn substitute(part: &str, values: &Placeholders) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(part.len());
    let mut last = 0;
    for (start, end, name) in tokens(part) {
        let value = values.get(name).ok_or_else(|| TemplateError::MissingValue {
            name: name.to_string(),
        })?;
        out.push_str(&part[last..start]);
        out.push_str(value);
        last = end;
    }
    out.push_str(&part[last..]);
    Ok(out)
}
