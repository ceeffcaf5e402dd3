use crate::discovery::{DiscoveryProvider, ProviderError};
use crate::model::{ScanItem, UNKNOWN_OWNER};

pub const NATIVE_PROVIDER_NAME: &str = "win32";

/// Top-level window enumeration through the Win32 surface. Off Windows the
/// provider reports an empty desktop rather than failing, so the service
/// runs everywhere and the real work happens only where it can.
#[derive(Default)]
pub struct NativeWindowProvider;

impl NativeWindowProvider {
    pub fn new() -> Self {
        Self
    }
}

impl DiscoveryProvider for NativeWindowProvider {
    fn provider_name(&self) -> &str {
        NATIVE_PROVIDER_NAME
    }

    fn scan(&self) -> Result<Vec<ScanItem>, ProviderError> {
        enumerate_windows()
    }

    fn resolve_group_owner(&self, group_key: u32) -> String {
        resolve_owner_label(group_key)
    }

    fn is_resource_alive(&self, handle: i64) -> bool {
        window_exists(handle)
    }
}

#[cfg(target_os = "windows")]
fn enumerate_windows() -> Result<Vec<ScanItem>, ProviderError> {
    use std::collections::HashMap;

    use windows_sys::Win32::Foundation::{HWND, LPARAM};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId,
        IsWindowVisible,
    };

    unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> i32 {
        let windows = &mut *(lparam as *mut Vec<(i64, String, u32)>);

        if IsWindowVisible(hwnd) == 0 {
            return 1;
        }

        let length = GetWindowTextLengthW(hwnd);
        if length <= 0 {
            return 1;
        }

        let mut buffer = vec![0_u16; length as usize + 1];
        let copied = GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32);
        if copied <= 0 {
            return 1;
        }
        let title = String::from_utf16_lossy(&buffer[..copied as usize]);

        let mut pid = 0_u32;
        GetWindowThreadProcessId(hwnd, &mut pid);

        windows.push((hwnd as isize as i64, title, pid));
        1
    }

    let mut collected: Vec<(i64, String, u32)> = Vec::new();
    let ok = unsafe {
        EnumWindows(
            Some(collect_window),
            &mut collected as *mut Vec<(i64, String, u32)> as LPARAM,
        )
    };
    if ok == 0 {
        return Err(ProviderError::new("EnumWindows failed"));
    }

    // One image-path lookup per process, not per window.
    let mut images: HashMap<u32, Option<String>> = HashMap::new();
    let mut items = Vec::with_capacity(collected.len());
    for (handle, title, pid) in collected {
        let image = images
            .entry(pid)
            .or_insert_with(|| process_image_path(pid))
            .clone();
        let owner_label = image
            .as_deref()
            .and_then(file_stem_of)
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string());
        let is_fallback = image.is_none();

        let mut item = ScanItem::new(handle, &title, pid, &owner_label);
        item.executable_path = image;
        item.is_fallback = is_fallback;
        items.push(item);
    }

    Ok(items)
}

#[cfg(target_os = "windows")]
fn resolve_owner_label(group_key: u32) -> String {
    process_image_path(group_key)
        .as_deref()
        .and_then(file_stem_of)
        .unwrap_or_else(|| UNKNOWN_OWNER.to_string())
}

#[cfg(target_os = "windows")]
fn window_exists(handle: i64) -> bool {
    use windows_sys::Win32::Foundation::HWND;
    use windows_sys::Win32::UI::WindowsAndMessaging::IsWindow;

    unsafe { IsWindow(handle as isize as HWND) != 0 }
}

#[cfg(target_os = "windows")]
fn process_image_path(pid: u32) -> Option<String> {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
        PROCESS_QUERY_LIMITED_INFORMATION,
    };

    if pid == 0 {
        return None;
    }

    let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
    if process.is_null() {
        return None;
    }

    let mut buffer = vec![0_u16; 1024];
    let mut size = buffer.len() as u32;
    let ok = unsafe {
        QueryFullProcessImageNameW(process, PROCESS_NAME_WIN32, buffer.as_mut_ptr(), &mut size)
    };
    unsafe {
        CloseHandle(process);
    }

    if ok == 0 || size == 0 {
        return None;
    }
    Some(String::from_utf16_lossy(&buffer[..size as usize]))
}

#[cfg(target_os = "windows")]
fn file_stem_of(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}

#[cfg(not(target_os = "windows"))]
fn enumerate_windows() -> Result<Vec<ScanItem>, ProviderError> {
    Ok(Vec::new())
}

#[cfg(not(target_os = "windows"))]
fn resolve_owner_label(_group_key: u32) -> String {
    UNKNOWN_OWNER.to_string()
}

#[cfg(not(target_os = "windows"))]
fn window_exists(_handle: i64) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::NativeWindowProvider;
    use crate::discovery::DiscoveryProvider;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn native_provider_scans_empty_off_windows() {
        let provider = NativeWindowProvider::new();
        assert!(provider.scan().unwrap().is_empty());
        assert!(!provider.is_resource_alive(1));
    }

    #[test]
    fn native_provider_name_is_stable() {
        assert_eq!(NativeWindowProvider::new().provider_name(), "win32");
    }
}
