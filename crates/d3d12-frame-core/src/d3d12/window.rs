use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Gdi::{GetMonitorInfoW, MONITOR_DEFAULTTONEAREST, MONITORINFO, MonitorFromWindow};
use windows::Win32::UI::WindowsAndMessaging::*;

use crate::gpu::{FullscreenWindow, WindowRect};
use crate::{FrameError, FrameResult};

/// Borderless fullscreen over a plain Win32 window.
pub struct Win32Window {
    hwnd: HWND,
}

impl Win32Window {
    pub fn new(hwnd: HWND) -> Self {
        Self { hwnd }
    }

    pub fn hwnd(&self) -> HWND {
        self.hwnd
    }
}

impl FullscreenWindow for Win32Window {
    fn window_rect(&self) -> FrameResult<WindowRect> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(self.hwnd, &mut rect)? };
        Ok(WindowRect {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        })
    }

    fn enter_borderless(&mut self) -> FrameResult<()> {
        let style = WS_OVERLAPPEDWINDOW
            & !(WS_CAPTION | WS_SYSMENU | WS_THICKFRAME | WS_MINIMIZEBOX | WS_MAXIMIZEBOX);
        unsafe { SetWindowLongW(self.hwnd, GWL_STYLE, style.0 as i32) };

        let monitor = unsafe { MonitorFromWindow(self.hwnd, MONITOR_DEFAULTTONEAREST) };
        let mut info = MONITORINFO {
            cbSize: std::mem::size_of::<MONITORINFO>() as u32,
            ..Default::default()
        };
        if !unsafe { GetMonitorInfoW(monitor, &mut info) }.as_bool() {
            return Err(FrameError::device("GetMonitorInfoW failed"));
        }

        let area = info.rcMonitor;
        unsafe {
            SetWindowPos(
                self.hwnd,
                Some(HWND_TOP),
                area.left,
                area.top,
                area.right - area.left,
                area.bottom - area.top,
                SWP_FRAMECHANGED | SWP_NOACTIVATE,
            )?;
            _ = ShowWindow(self.hwnd, SW_MAXIMIZE);
        }
        Ok(())
    }

    fn restore_windowed(&mut self, rect: WindowRect) -> FrameResult<()> {
        unsafe {
            SetWindowLongW(self.hwnd, GWL_STYLE, WS_OVERLAPPEDWINDOW.0 as i32);
            SetWindowPos(
                self.hwnd,
                Some(HWND_NOTOPMOST),
                rect.left,
                rect.top,
                rect.width(),
                rect.height(),
                SWP_FRAMECHANGED | SWP_NOACTIVATE,
            )?;
            _ = ShowWindow(self.hwnd, SW_NORMAL);
        }
        Ok(())
    }
}
