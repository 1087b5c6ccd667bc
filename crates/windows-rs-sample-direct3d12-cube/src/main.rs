#[cfg(windows)]
mod create_window;
#[cfg(windows)]
mod cube_sample;
#[cfg(windows)]
mod pipeline;
#[cfg(windows)]
mod window_class;
mod windy_error;

use windy_error::SampleResult;

#[cfg(windows)]
pub fn main() -> SampleResult<()> {
    use create_window::create_window;
    use cube_sample::CubeSample;
    use d3d12_frame_core::config::build_command_line;
    use d3d12_frame_core::d3d12::{check_tearing_support, create_device};
    use tracing::{error, info};
    use widestring::U16CString;
    use window_class::{CubeWindow, WindowEvents, create_window_class_struct, register_window_class};
    use windows::Win32::UI::WindowsAndMessaging::*;
    use windows::core::PCWSTR;

    color_eyre::install()?;
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_target(false)
        .init();

    let command_line = build_command_line()?;
    info!("{command_line:?}");

    let our_module = get_handle_to_file_used_to_create_the_calling_process()?;
    let window_class = create_window_class_struct::<CubeWindow>(our_module)?;
    register_window_class(&window_class)?;

    let (dxgi_factory, device) = create_device(command_line.use_warp_device)?;
    let config = command_line.frame_config(check_tearing_support(&dxgi_factory));

    let title = match command_line.use_warp_device {
        true => "D3D12 Frame Core Cube (WARP)",
        false => "D3D12 Frame Core Cube",
    };
    let title = U16CString::from_str(title).map_err(|e| eyre::eyre!("invalid window title: {e}"))?;

    let events = WindowEvents::default();
    let window_size = (1280, 720);
    let hwnd = create_window::<CubeWindow>(our_module, window_size, PCWSTR(title.as_ptr()), &events)?;

    let mut sample = CubeSample::new(&dxgi_factory, device, hwnd, window_size, &config)?;
    unsafe { _ = ShowWindow(hwnd, SW_SHOW) };

    let mut done = false;
    while !done {
        let mut message = MSG::default();

        if unsafe { PeekMessageW(&mut message, None, 0, 0, PM_REMOVE) }.into() {
            unsafe {
                _ = TranslateMessage(&message);
                DispatchMessageW(&message);
            }
            if message.message == WM_QUIT {
                done = true;
            }
            continue;
        }

        if let Some((width, height)) = events.take_resize() {
            sample.resize(width, height)?;
        }
        if events.take_toggle_fullscreen() {
            sample.toggle_fullscreen()?;
        }
        if events.take_toggle_vsync() {
            sample.toggle_vsync();
        }

        if let Err(e) = sample.render() {
            error!("Render error: {e:?}");
            break;
        }
    }

    sample.shutdown()?;
    info!("Goodbye");
    Ok(())
}

#[cfg(windows)]
fn get_handle_to_file_used_to_create_the_calling_process() -> SampleResult<windows::Win32::Foundation::HMODULE> {
    use windows::Win32::System::LibraryLoader::GetModuleHandleExW;

    let mut out = Default::default();
    unsafe { GetModuleHandleExW(Default::default(), None, &mut out)? };
    Ok(out)
}

#[cfg(not(windows))]
pub fn main() -> SampleResult<()> {
    Err(eyre::eyre!("the Direct3D 12 cube sample only runs on Windows").into())
}
