use crate::error::AppError;

#[derive(Debug)]
pub struct AccessGrant {
    _private: (),
}

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    api_key: Option<String>,
}

impl AccessPolicy {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    pub fn open() -> Self {
        Self::default()
    }

    pub fn check(&self, presented: Option<&str>) -> Result<AccessGrant, AppError> {
        match &self.api_key {
            None => Ok(AccessGrant { _private: () }),
            Some(expected) if presented == Some(expected.as_str()) => {
                Ok(AccessGrant { _private: () })
            }
            Some(_) => Err(AppError::PermissionDenied("Insufficient rights".into())),
        }
    }
}
