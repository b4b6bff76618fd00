//! Geometry and configuration core of a desktop compositor.
//!
//! Three tightly coupled subsystems live here:
//!
//! * the monitor configuration subsystem, which turns physical outputs into a
//!   logical monitor layout and picks which candidate configuration to
//!   activate when hardware changes ([`monitor`]);
//! * the window constraint solver, which reconciles a proposed window
//!   rectangle against a priority-tiered set of layout rules
//!   ([`window::constraints`]);
//! * the window placement heuristics for newly mapped windows
//!   ([`window::place`]).
//!
//! Everything else a compositor needs — rendering, protocol marshaling, input,
//! persistence — is an external collaborator. The core consumes snapshots
//! (output inventory, window size hints) and produces rectangles.

#[macro_use]
extern crate tracing;

pub mod monitor;
pub mod region;
pub mod utils;
pub mod window;

pub use oriel_ipc::{Gravity, LayoutMode, Point, Rect, Size, Transform};
