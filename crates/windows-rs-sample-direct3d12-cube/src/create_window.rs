use windows::Win32::Foundation::*;
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::PCWSTR;

use crate::window_class::WindowClass;
use crate::windy_error::SampleResult;

/// Creates a window whose client area is `client_size`, centered on the
/// primary monitor.
///
/// `window_data` is stored in the window's user data and must outlive it.
pub fn create_window<W: WindowClass>(
    our_module: HMODULE,
    client_size: (u32, u32),
    title: PCWSTR,
    window_data: &W::WindowData,
) -> SampleResult<HWND> {
    let mut window_rect = RECT {
        left: 0,
        top: 0,
        right: client_size.0 as i32,
        bottom: client_size.1 as i32,
    };
    unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false)? };

    let window_width = window_rect.right - window_rect.left;
    let window_height = window_rect.bottom - window_rect.top;
    let screen_width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
    let screen_height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
    let x = ((screen_width - window_width) / 2).max(0);
    let y = ((screen_height - window_height) / 2).max(0);

    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            W::ID,
            title,
            WS_OVERLAPPEDWINDOW,
            x,
            y,
            window_width,
            window_height,
            None,
            None,
            Some(our_module.into()),
            Some(window_data as *const W::WindowData as _),
        )
    }?;
    Ok(hwnd)
}
