//! AWS Lambda implementation of [`FunctionPlatform`].

use async_trait::async_trait;
use aws_sdk_lambda as lambda;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{
    Architecture, EphemeralStorage, FunctionCode, LastUpdateStatus, Runtime, State,
};
use fnpack_schema::Arch;

use super::platform::{
    CodePayload, ConfigUpdate, CreateFunction, FunctionPlatform, HANDLER, RemoteFunction,
};
use crate::error::DeployError;

#[derive(Debug, Clone)]
pub struct LambdaPlatform {
    client: lambda::Client,
}

impl LambdaPlatform {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: lambda::Client::new(config),
        }
    }

    pub fn from_client(client: lambda::Client) -> Self {
        Self { client }
    }
}

fn to_i32(value: u32, field: &'static str, function: &str) -> Result<i32, DeployError> {
    i32::try_from(value)
        .map_err(|_| DeployError::remote(field, function, format!("{value} exceeds i32 range")))
}

fn architecture(arch: Arch) -> Architecture {
    match arch {
        Arch::X86_64 => Architecture::X8664,
        Arch::Arm64 => Architecture::Arm64,
    }
}

#[async_trait]
impl FunctionPlatform for LambdaPlatform {
    async fn get_function(&self, name: &str) -> Result<Option<RemoteFunction>, DeployError> {
        let output = match self.client.get_function().function_name(name).send().await {
            Ok(output) => output,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                return Ok(None);
            }
            Err(err) => {
                return Err(DeployError::remote(
                    "GetFunction",
                    name,
                    DisplayErrorContext(&err),
                ));
            }
        };

        let Some(config) = output.configuration() else {
            return Ok(None);
        };

        Ok(Some(RemoteFunction {
            code_sha256: config.code_sha256().unwrap_or_default().to_string(),
            role: config.role().unwrap_or_default().to_string(),
            memory: config.memory_size().and_then(|m| u32::try_from(m).ok()),
            timeout: config.timeout().and_then(|t| u32::try_from(t).ok()),
        }))
    }

    async fn create_function(&self, request: &CreateFunction) -> Result<(), DeployError> {
        let name = request.name.as_str();
        let code = match &request.code {
            CodePayload::Inline(bytes) => FunctionCode::builder()
                .zip_file(Blob::new(bytes.clone()))
                .build(),
            CodePayload::ObjectStore { bucket, key } => FunctionCode::builder()
                .s3_bucket(bucket)
                .s3_key(key)
                .build(),
        };
        let storage = EphemeralStorage::builder()
            .size(to_i32(request.ephemeral_storage, "CreateFunction", name)?)
            .build()
            .map_err(|e| DeployError::remote("CreateFunction", name, e))?;

        self.client
            .create_function()
            .function_name(name)
            .runtime(Runtime::from(request.runtime.as_str()))
            .role(&request.role)
            .handler(HANDLER)
            .code(code)
            .timeout(to_i32(request.timeout, "CreateFunction", name)?)
            .memory_size(to_i32(request.memory, "CreateFunction", name)?)
            .ephemeral_storage(storage)
            .architectures(architecture(request.arch))
            .send()
            .await
            .map_err(|e| DeployError::remote("CreateFunction", name, DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn update_function_code(&self, name: &str, code: &CodePayload) -> Result<(), DeployError> {
        let request = self.client.update_function_code().function_name(name);
        let request = match code {
            CodePayload::Inline(bytes) => request.zip_file(Blob::new(bytes.clone())),
            CodePayload::ObjectStore { bucket, key } => request.s3_bucket(bucket).s3_key(key),
        };

        request.send().await.map_err(|e| {
            DeployError::remote("UpdateFunctionCode", name, DisplayErrorContext(&e))
        })?;
        Ok(())
    }

    async fn update_function_configuration(
        &self,
        name: &str,
        update: &ConfigUpdate,
    ) -> Result<(), DeployError> {
        const OP: &str = "UpdateFunctionConfiguration";
        let timeout = update.timeout.map(|t| to_i32(t, OP, name)).transpose()?;
        let memory = update.memory.map(|m| to_i32(m, OP, name)).transpose()?;

        self.client
            .update_function_configuration()
            .function_name(name)
            .set_timeout(timeout)
            .set_memory_size(memory)
            .set_role(update.role.clone())
            .send()
            .await
            .map_err(|e| DeployError::remote(OP, name, DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn is_stable(&self, name: &str) -> Result<bool, DeployError> {
        const OP: &str = "GetFunctionConfiguration";
        let config = self
            .client
            .get_function_configuration()
            .function_name(name)
            .send()
            .await
            .map_err(|e| DeployError::remote(OP, name, DisplayErrorContext(&e)))?;

        // A failed function never becomes stable; waiting would only time out.
        if matches!(config.state(), Some(State::Failed)) {
            let reason = config.state_reason().unwrap_or("no reason given");
            return Err(DeployError::remote(OP, name, format!("function failed: {reason}")));
        }
        if matches!(config.last_update_status(), Some(LastUpdateStatus::Failed)) {
            let reason = config.last_update_status_reason().unwrap_or("no reason given");
            return Err(DeployError::remote(OP, name, format!("last update failed: {reason}")));
        }

        let pending = matches!(config.state(), Some(State::Pending));
        let in_progress = matches!(config.last_update_status(), Some(LastUpdateStatus::InProgress));
        Ok(!pending && !in_progress)
    }
}
