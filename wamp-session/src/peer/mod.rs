mod connector;
mod dispatcher;
mod handler;
mod peer;
mod registration;
mod session;
mod subscription;
mod web_socket_peer;

pub use connector::{
    Connection,
    Connector,
    ConnectorFactory,
    WebSocketConnectorFactory,
};
pub use handler::{
    Event,
    EventHandler,
    Invocation,
    InvocationDetails,
    ProcedureHandler,
    ProgressEmitter,
    RpcYield,
};
pub use peer::{
    CalleeConfig,
    Peer,
    PeerConfig,
    PeerNotConnectedError,
    Procedure,
    ProcedureOptions,
    ProgressivePendingRpc,
    PublishedEvent,
    RpcCall,
    RpcResult,
    SimplePendingRpc,
    Subscription,
    SubscriptionOptions,
    SupportedAuthMethod,
    WebSocketConfig,
};
pub use session::SessionPhase;
pub use web_socket_peer::{
    WebSocketPeer,
    new_web_socket_peer,
};
