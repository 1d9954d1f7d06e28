//! `chainplace` jointly scales, places, and routes bidirectional network service chains on a
//! capacitated substrate network. Given a substrate of nodes and links, service templates
//! describing chains of virtual network functions, and the traffic sources injecting flows, it
//! produces an embedding: component instances bound to nodes and routed edges between them,
//! minimizing a configurable multi-criteria objective.

#![warn(unreachable_pub, missing_docs)]

pub mod core;
