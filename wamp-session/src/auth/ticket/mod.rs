mod authenticator;

pub use authenticator::ClientAuthenticator;
