use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Command;

/// A program invocation kept as plain data, so the same argv can be handed
/// to `std`/`tokio` processes or to a pty spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsCmd {
    pub bin: PathBuf,
    pub args: Vec<OsString>,
}

impl OsCmd {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, a: impl Into<OsString>) -> &mut Self {
        self.args.push(a.into());
        self
    }

    pub fn arg_if(&mut self, cond: bool, a: impl Into<OsString>) -> &mut Self {
        if cond {
            self.arg(a)
        } else {
            self
        }
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends `flag value` as two arguments.
    pub fn opt(&mut self, flag: &str, value: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(flag.into());
        self.args.push(value.as_ref().to_owned());
        self
    }

    pub fn has_arg(&self, a: impl AsRef<OsStr>) -> bool {
        let a = a.as_ref();
        self.args.iter().any(|x| x == a)
    }

    /// Returns the argument following `flag`, if any.
    pub fn opt_value(&self, flag: impl AsRef<OsStr>) -> Option<&OsStr> {
        let flag = flag.as_ref();
        let pos = self.args.iter().position(|x| x == flag)?;
        self.args.get(pos + 1).map(|s| s.as_os_str())
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(&self.args);
        cmd
    }
}
