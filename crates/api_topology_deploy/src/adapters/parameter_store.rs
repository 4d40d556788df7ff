use aws_sdk_ssm::error::DisplayErrorContext;

/// Read access to the shared parameter store.
pub trait ParameterStore {
    /// `Ok(None)` when the parameter does not exist.
    fn get_parameter(&self, name: &str) -> Result<Option<String>, String>;
}

pub struct SsmParameterStore {
    client: aws_sdk_ssm::Client,
}

impl SsmParameterStore {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

impl ParameterStore for SsmParameterStore {
    fn get_parameter(&self, name: &str) -> Result<Option<String>, String> {
        let client = self.client.clone();
        let parameter_name = name.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                match client.get_parameter().name(&parameter_name).send().await {
                    Ok(output) => Ok(output
                        .parameter()
                        .and_then(|parameter| parameter.value())
                        .map(str::to_string)),
                    Err(error) => {
                        if error
                            .as_service_error()
                            .is_some_and(|service| service.is_parameter_not_found())
                        {
                            Ok(None)
                        } else {
                            Err(format!(
                                "failed to read parameter {parameter_name}: {}",
                                DisplayErrorContext(&error)
                            ))
                        }
                    }
                }
            })
        })
    }
}
