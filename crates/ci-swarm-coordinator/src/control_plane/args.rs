//! Argument vector builder
//!
//! Arguments are always passed to the CLI as separate argv entries, never
//! joined into a shell string, so values need no quoting.

/// Ordered CLI arguments for one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    args: Vec<String>,
}

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// `--name value`
    pub fn flag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.args.push(name.to_string());
        self.args.push(value.into());
        self
    }

    /// `--name value` only when `value` is present
    pub fn flag_opt(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.flag(name, v),
            None => self,
        }
    }

    /// `--name v1 v2 ...` (list-valued parameter)
    pub fn flag_list<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.push(name.to_string());
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Bare `--name`
    pub fn switch(mut self, name: &str) -> Self {
        self.args.push(name.to_string());
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    pub fn into_vec(self) -> Vec<String> {
        self.args
    }
}
