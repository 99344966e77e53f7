//! # wamp-session
//!
//! **wamp-session** is a client-side implementation of the [WAMP](https://wamp-proto.org/spec.html)
//! session layer. A [`peer::Peer`] connects to a router, joins a realm (optionally authenticating
//! with WAMP-cryptosign or WAMP-ticket), and multiplexes procedure calls, registrations,
//! subscriptions, and publications over a single connection.
//!
//! Registered procedures and subscriptions are serviced by handler objects implementing
//! [`peer::ProcedureHandler`] and [`peer::EventHandler`]. Each invocation or event runs in its own
//! task, so long-running handlers never block message delivery.

pub mod auth;
pub mod core;
pub mod message;
pub mod peer;
pub mod serializer;
pub mod transport;
