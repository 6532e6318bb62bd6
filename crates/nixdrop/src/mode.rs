/// What this invocation does to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Create or update the droplet.
    Up,
    /// Tear the stack down.
    Destroy,
}

impl Mode {
    /// Pick the mode from the process arguments (program name first).
    ///
    /// Only an exact `destroy` as the first argument selects teardown.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match args.into_iter().nth(1) {
            Some(arg) if arg.as_ref() == "destroy" => Self::Destroy,
            _ => Self::Up,
        }
    }
}
