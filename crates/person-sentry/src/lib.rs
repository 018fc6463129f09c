pub mod cli;
pub mod cooldown;
pub mod pipeline;
pub mod publish;
pub mod settings;

#[cfg(feature = "source-amqp")]
pub mod broker;
