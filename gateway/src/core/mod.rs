pub mod events;
pub mod lifecycle;
pub mod platform;
pub mod registry;
pub mod relay;
pub mod service;

// Re-export commonly used types for convenience
pub use events::{ClientEvent, ClientHandle, MessageRoute, Speaker};
pub use lifecycle::ConversationLifecycle;
pub use platform::{
    ConversationPlatform, ExecutionOutcome, PlatformConfig, PlatformConversation, PlatformError,
    PlatformHandler, PlatformResult, WsPlatformClient, create_platform,
};
pub use registry::{
    ClosedConversation, ConversationInput, ConversationRegistry, ConversationState, PendingOutput,
};
pub use relay::RelayHandlers;
pub use service::{
    ConversationService, EchoConversationService, HttpConversationService, ServiceError,
    ServiceResult, create_conversation_service,
};
