//! Module that contains utility functions for fault injection in test code

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Always,
    Never,
}

/// A fault is an error that is returned based on the [`When`]
#[derive(Clone, Copy, Debug)]
pub struct Fault {
    pub when: When,
}

impl Fault {
    pub fn triggered(&self) -> bool {
        self.when == When::Always
    }
}

impl Default for Fault {
    fn default() -> Self {
        Self { when: When::Never }
    }
}
