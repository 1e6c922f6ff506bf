// Longboard throttle: ramp-limited motor control fed by a remote power link

pub mod comm;
pub mod config;
pub mod messages;
pub mod pwm;
pub mod runtime;
pub mod status;
pub mod throttle;
