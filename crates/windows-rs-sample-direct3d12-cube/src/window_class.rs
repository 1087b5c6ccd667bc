use std::cell::Cell;

use tracing::{debug, info};
use windows::Win32::Foundation::*;
use windows::Win32::UI::Input::KeyboardAndMouse::{VK_ESCAPE, VK_F11, VK_RETURN};
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::PCWSTR;

use crate::windy_error::SampleResult;

pub trait WindowClass {
    const ID: PCWSTR;

    /// Lives in GWLP_USERDATA; must outlive the window.
    type WindowData;

    /// Returns true if the message was handled.
    fn handle(data: &Self::WindowData, window: HWND, message: u32, wparam: WPARAM, lparam: LPARAM) -> bool;
}

pub fn create_window_class_struct<W: WindowClass>(instance: HMODULE) -> SampleResult<WNDCLASSEXW> {
    let wc = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc::<W>),
        hInstance: instance.into(),
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW)? },
        lpszClassName: W::ID,
        ..Default::default()
    };
    Ok(wc)
}

pub fn register_window_class(class: &WNDCLASSEXW) -> SampleResult<u16> {
    let atom = unsafe { RegisterClassExW(class) };
    if atom == 0 {
        return Err(windows::core::Error::from_win32().into());
    }
    Ok(atom)
}

extern "system" fn wndproc<W: WindowClass>(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if message == WM_CREATE {
        unsafe {
            let create_struct: &CREATESTRUCTW = &*(lparam.0 as *const CREATESTRUCTW);
            SetWindowLongPtrW(window, GWLP_USERDATA, create_struct.lpCreateParams as _);
        }
        return LRESULT(0);
    }

    let user_data = unsafe { GetWindowLongPtrW(window, GWLP_USERDATA) };
    let Some(data) = std::ptr::NonNull::<W::WindowData>::new(user_data as *mut W::WindowData) else {
        // Messages can arrive before WM_CREATE.
        return unsafe { DefWindowProcW(window, message, wparam, lparam) };
    };

    let handled = match message {
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            true
        }
        _ => W::handle(unsafe { data.as_ref() }, window, message, wparam, lparam),
    };

    if handled {
        LRESULT(0)
    } else {
        unsafe { DefWindowProcW(window, message, wparam, lparam) }
    }
}

/// Input gathered by the window procedure, drained once per loop iteration.
#[derive(Default)]
pub struct WindowEvents {
    resize: Cell<Option<(u32, u32)>>,
    toggle_fullscreen: Cell<bool>,
    toggle_vsync: Cell<bool>,
}

impl WindowEvents {
    pub fn take_resize(&self) -> Option<(u32, u32)> {
        self.resize.take()
    }

    pub fn take_toggle_fullscreen(&self) -> bool {
        self.toggle_fullscreen.take()
    }

    pub fn take_toggle_vsync(&self) -> bool {
        self.toggle_vsync.take()
    }
}

pub struct CubeWindow;

impl WindowClass for CubeWindow {
    const ID: PCWSTR = windows::core::w!("D3d12FrameCoreCube");

    type WindowData = WindowEvents;

    fn handle(data: &WindowEvents, window: HWND, message: u32, wparam: WPARAM, lparam: LPARAM) -> bool {
        let key = wparam.0 as u16;
        match message {
            WM_SIZE => {
                let width = (lparam.0 & 0xffff) as u32;
                let height = ((lparam.0 >> 16) & 0xffff) as u32;
                data.resize.set(Some((width, height)));
                true
            }
            WM_KEYDOWN if key == VK_ESCAPE.0 => {
                info!("Escape pressed, closing");
                unsafe { DestroyWindow(window).ok() };
                true
            }
            WM_KEYDOWN if key == VK_F11.0 => {
                data.toggle_fullscreen.set(true);
                true
            }
            WM_KEYDOWN if key == u16::from(b'V') => {
                data.toggle_vsync.set(true);
                true
            }
            // Bit 29: Alt is held.
            WM_SYSKEYDOWN if key == VK_RETURN.0 && (lparam.0 & (1 << 29)) != 0 => {
                data.toggle_fullscreen.set(true);
                true
            }
            // Swallow the menu beep for Alt+Enter.
            WM_SYSCHAR => true,
            WM_KEYDOWN => {
                debug!("WM_KEYDOWN: {key:#x}");
                false
            }
            WM_PAINT => false,
            _ => false,
        }
    }
}
