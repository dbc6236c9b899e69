pub mod database_toolbox_actor;
pub mod embedded_sqlite_actor;
pub mod foundry;
pub mod mcp_host_actor;
pub mod python_actor;
pub mod rag;
pub mod schema_vector_actor;
pub mod startup_actor;
pub mod vector_actor;

// Re-export actors at the original location for backward compatibility
pub use foundry::ModelGatewayActor;
pub use rag::RagRetrievalActor;
pub use startup_actor::StartupCoordinatorActor;
