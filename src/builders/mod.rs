//! Builders to construct queues from a pool plus configuration.

pub mod queue_builder;

pub use queue_builder::QueueBuilder;
