#![forbid(unsafe_code)]

pub mod thread_dispatch;
pub mod thread_guard;
pub mod thread_lifecycle;
pub mod thread_owner;

#[cfg(test)]
pub(crate) mod test_support;
