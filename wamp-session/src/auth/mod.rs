pub mod auth_method;
pub mod authenticator;
pub mod cryptosign;
pub mod flow;
pub mod identity;
pub mod message;
pub mod ticket;

pub use auth_method::AuthMethod;
pub use authenticator::{
    ClientAuthenticator,
    GenericClientAuthenticator,
    make_generic_client_authenticator,
};
pub use flow::{
    AuthenticationFlow,
    AuthenticationState,
};
pub use identity::Identity;
