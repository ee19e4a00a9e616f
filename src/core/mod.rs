//! Request dispatch.
//!
//! The [`dispatcher::Dispatcher`] validates a request, screens its source and
//! routes it to the backend of its target. Target-specific logic lives in
//! [`crate::judge`].

pub mod dispatcher;
