use prost_reflect::DynamicMessage;
use quack_transport::{Address, Verb};

/// A decoded reply from the selected dongle, handed to the presentation layer.
#[derive(Debug)]
pub struct DisplayEvent<'a> {
    pub module: &'a str,
    pub verb: &'a Verb,
    /// Commands the module currently exposes.
    pub commands: &'a [String],
    pub message: &'a DynamicMessage,
    pub address: &'a Address,
}

pub type DisplayFn = Box<dyn Fn(&DisplayEvent<'_>) + Send + Sync>;
