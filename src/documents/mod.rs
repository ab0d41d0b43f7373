//! Document Store & Membership: documents, roles, share links and the thin
//! folder organization layer.

mod folders;
mod share_link;
mod store;

pub use folders::{create as create_folder, list_for as list_folders, Folder};
pub use share_link::ShareMode;
pub use store::{Document, DocumentStore, ShareStatus};

// vim: ts=4
