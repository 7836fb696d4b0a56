use std::fmt;

/// Failures that abort renderer startup.
#[derive(Debug)]
pub enum SetupError {
    Surface(wgpu::CreateSurfaceError),
    Adapter(wgpu::RequestAdapterError),
    Device(wgpu::RequestDeviceError),
    MissingFeatures(wgpu::Features),
    Geometry(String),
    Texture(String),
    /// A GPU resource the renderer depends on could not be created.
    Resource(String),
    Io(std::io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Surface(err) => write!(f, "failed to create surface: {err}"),
            SetupError::Adapter(err) => write!(f, "no suitable adapter: {err}"),
            SetupError::Device(err) => write!(f, "failed to create device: {err}"),
            SetupError::MissingFeatures(features) => {
                write!(f, "adapter is missing required features: {features:?}")
            }
            SetupError::Geometry(msg) => write!(f, "invalid geometry: {msg}"),
            SetupError::Texture(msg) => write!(f, "texture error: {msg}"),
            SetupError::Resource(msg) => write!(f, "resource creation failed: {msg}"),
            SetupError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Surface(err) => Some(err),
            SetupError::Adapter(err) => Some(err),
            SetupError::Device(err) => Some(err),
            SetupError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<wgpu::CreateSurfaceError> for SetupError {
    fn from(err: wgpu::CreateSurfaceError) -> Self {
        SetupError::Surface(err)
    }
}

impl From<wgpu::RequestAdapterError> for SetupError {
    fn from(err: wgpu::RequestAdapterError) -> Self {
        SetupError::Adapter(err)
    }
}

impl From<wgpu::RequestDeviceError> for SetupError {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        SetupError::Device(err)
    }
}

impl From<std::io::Error> for SetupError {
    fn from(err: std::io::Error) -> Self {
        SetupError::Io(err)
    }
}

impl From<image::ImageError> for SetupError {
    fn from(err: image::ImageError) -> Self {
        SetupError::Texture(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        let err = SetupError::Geometry("bone index 9 out of range".into());
        assert_eq!(err.to_string(), "invalid geometry: bone index 9 out of range");

        let err = SetupError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "noise.png"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
