use async_trait::async_trait;
use mongodb::bson::Document;
use mongodb::options::ClientOptions;
use mongodb::Client;

use crate::operations::AdminCommandRunner;

pub const ADMIN_DATABASE: &str = "admin";

/// Builds a driver client; no round trip happens until the first command.
pub async fn connect(uri: &str, app_name: &str) -> mongodb::error::Result<Client> {
    let mut options = ClientOptions::parse(uri).await?;
    options.app_name = Some(app_name.to_string());
    Client::with_options(options)
}

#[async_trait]
impl AdminCommandRunner for Client {
    async fn run_admin_command(&self, command: Document) -> anyhow::Result<Document> {
        let reply = self.database(ADMIN_DATABASE).run_command(command, None).await?;
        Ok(reply)
    }
}
