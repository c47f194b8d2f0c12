pub use node::{ServerNode, NODE_CONNECTED};
pub use user::User;
mod node;
mod user;
