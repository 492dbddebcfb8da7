use crate::models::Md5Sum;

/// Authoritative firmware image for one gateway model.
#[derive(Debug, Clone, Eq, PartialEq, sqlx::FromRow)]
pub struct GatewayFirmware {
    pub model: String,
    pub resource_link: String,
    pub firmware_hash: Md5Sum,
}

impl GatewayFirmware {
    pub fn placeholder(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            resource_link: String::new(),
            firmware_hash: Md5Sum::ZERO,
        }
    }
    /// A row inserted for a newly seen model before the first sync filled it in.
    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.resource_link.is_empty()
    }
}
