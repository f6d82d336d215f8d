pub mod rest;
pub mod state;

// Re-export the handlers the binary wires into the router.
pub use rest::{
    chat_handler, create_session_handler, delete_session_handler, download_artifact_handler,
    generate_notes_handler, generate_practice_test_handler, get_session_handler, health_handler,
    list_sessions_handler, remove_document_handler, rename_session_handler,
    upload_documents_handler,
};
pub use state::AppState;
