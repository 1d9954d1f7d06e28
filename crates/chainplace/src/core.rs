//! Core chainplace data structures, traits, and routines. The most common entry point is
//! [solve()], which embeds a [request](Spec) into a substrate [network](Network) and returns the
//! resulting [overlays](Overlays) together with their [metrics](Metrics).

pub use chainplace_core::*;
