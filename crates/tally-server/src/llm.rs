//! OpenAI chat backend for the translator

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tally_engine::prompt::Role;
use tally_engine::{ModelCall, ModelCallError, Prompt};
use tracing::debug;

use crate::config::ModelConfig;

pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    config: ModelConfig,
}

impl OpenAiModel {
    pub fn new(api_key: String, config: ModelConfig) -> Self {
        let client = Client::with_config(OpenAIConfig::new().with_api_key(api_key));
        Self { client, config }
    }

    fn messages(prompt: &Prompt) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt.system.clone())
            .build()?
            .into()];
        for message in &prompt.messages {
            let message: ChatCompletionRequestMessage = match message.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait]
impl ModelCall for OpenAiModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelCallError> {
        let network = |e: OpenAIError| ModelCallError::Network(e.to_string());

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.config.name.as_str())
            .messages(Self::messages(prompt).map_err(network)?)
            .temperature(self.config.temperature)
            .build()
            .map_err(network)?;

        let response = self.client.chat().create(request).await.map_err(network)?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ModelCallError::Network("No response content from OpenAI".to_string()))?;

        debug!(model = %self.config.name, chars = content.len(), "LLM response");
        Ok(content)
    }
}
