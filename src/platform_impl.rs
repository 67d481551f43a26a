//! Platform-specific device extension loading.

#[cfg(windows)]
#[path = "platform_impl/windows.rs"]
mod windows;
#[cfg(windows)]
pub(crate) use windows::PlatformExtensions;

#[cfg(not(windows))]
pub(crate) struct PlatformExtensions;

#[cfg(not(windows))]
impl PlatformExtensions {
    pub(crate) fn names() -> &'static [&'static str] {
        &[]
    }

    pub(crate) fn load(
        _entry: &ash::Entry,
        _instance: &ash::Instance,
        _device: &ash::Device,
    ) -> PlatformExtensions {
        PlatformExtensions
    }
}
