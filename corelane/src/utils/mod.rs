#[cfg(test)]
pub(crate) mod scheduler;

pub(crate) mod thread;
