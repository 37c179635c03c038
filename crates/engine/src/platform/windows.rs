//! Win32 backend for window manipulation and input injection

use uidriver_common::{Error, Key, KeyCombo, Modifier, MouseButton, Point, Rect, Result, WindowHandle};
use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, SetFocus, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEEVENTF_LEFTDOWN,
    MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN,
    MOUSEEVENTF_RIGHTUP, MOUSEINPUT, VIRTUAL_KEY, VK_BACK, VK_CONTROL, VK_DELETE, VK_DOWN,
    VK_END, VK_ESCAPE, VK_F1, VK_HOME, VK_LEFT, VK_LWIN, VK_MENU, VK_NEXT, VK_PRIOR,
    VK_RETURN, VK_RIGHT, VK_SHIFT, VK_TAB, VK_UP,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetForegroundWindow, IsHungAppWindow, IsIconic, IsWindow, PostMessageW, SetCursorPos,
    SetForegroundWindow, SetWindowPos, ShowWindow, HWND_TOP, SWP_NOZORDER, SW_MAXIMIZE,
    SW_MINIMIZE, SW_RESTORE, WM_CLOSE,
};

fn hwnd(handle: WindowHandle) -> Result<HWND> {
    let h = HWND(handle.0 as isize as *mut core::ffi::c_void);
    if unsafe { IsWindow(Some(h)) }.as_bool() {
        Ok(h)
    } else {
        Err(Error::WindowGone(handle.0))
    }
}

pub fn focus_window(handle: WindowHandle) -> Result<()> {
    let h = hwnd(handle)?;
    unsafe {
        if IsIconic(h).as_bool() {
            let _ = ShowWindow(h, SW_RESTORE);
        }
        // Fails transiently under foreground-lock; callers poll and retry.
        if !SetForegroundWindow(h).as_bool() {
            return Err(Error::WindowOperation(format!(
                "SetForegroundWindow refused for {handle}"
            )));
        }
        let _ = SetFocus(Some(h));
    }
    if unsafe { GetForegroundWindow() } != h {
        return Err(Error::WindowOperation(format!(
            "{handle} did not reach foreground"
        )));
    }
    Ok(())
}

pub fn set_window_frame(handle: WindowHandle, frame: Rect) -> Result<()> {
    let h = hwnd(handle)?;
    unsafe {
        SetWindowPos(
            h,
            Some(HWND_TOP),
            frame.x,
            frame.y,
            frame.width as i32,
            frame.height as i32,
            SWP_NOZORDER,
        )
        .map_err(|e| Error::WindowOperation(format!("SetWindowPos failed for {handle}: {e}")))
    }
}

pub fn set_minimized(handle: WindowHandle, minimized: bool) -> Result<()> {
    let h = hwnd(handle)?;
    let cmd = if minimized { SW_MINIMIZE } else { SW_RESTORE };
    unsafe {
        let _ = ShowWindow(h, cmd);
    }
    Ok(())
}

pub fn set_maximized(handle: WindowHandle, maximized: bool) -> Result<()> {
    let h = hwnd(handle)?;
    let cmd = if maximized { SW_MAXIMIZE } else { SW_RESTORE };
    unsafe {
        let _ = ShowWindow(h, cmd);
    }
    Ok(())
}

pub fn restore_window(handle: WindowHandle) -> Result<()> {
    let h = hwnd(handle)?;
    unsafe {
        let _ = ShowWindow(h, SW_RESTORE);
    }
    Ok(())
}

pub fn request_close(handle: WindowHandle) -> Result<()> {
    let h = hwnd(handle)?;
    unsafe {
        PostMessageW(Some(h), WM_CLOSE, WPARAM(0), LPARAM(0))
            .map_err(|e| Error::WindowOperation(format!("WM_CLOSE post failed for {handle}: {e}")))
    }
}

pub fn is_hung(handle: WindowHandle) -> Result<bool> {
    let h = hwnd(handle)?;
    Ok(unsafe { IsHungAppWindow(h) }.as_bool())
}

pub fn click_at(point: Point, button: MouseButton) -> Result<()> {
    unsafe {
        SetCursorPos(point.x, point.y)
            .map_err(|e| Error::WindowOperation(format!("SetCursorPos failed: {e}")))?;
    }
    let (down, up) = match button {
        MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
        MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
        MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
    };
    let inputs: Vec<INPUT> = [down, up]
        .into_iter()
        .map(|flags| INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        })
        .collect();
    send_inputs(&inputs)
}

pub fn send_text(text: &str) -> Result<()> {
    let mut inputs = Vec::with_capacity(text.len() * 4);
    for unit in text.encode_utf16() {
        inputs.push(unicode_input(unit, KEYBD_EVENT_FLAGS(0)));
        inputs.push(unicode_input(unit, KEYEVENTF_KEYUP));
    }
    send_inputs(&inputs)
}

pub fn send_key_combo(combo: &KeyCombo) -> Result<()> {
    let mut inputs = Vec::new();
    for m in &combo.modifiers {
        inputs.push(vk_input(modifier_vk(*m), KEYBD_EVENT_FLAGS(0)));
    }
    let vk = key_vk(&combo.key)?;
    inputs.push(vk_input(vk, KEYBD_EVENT_FLAGS(0)));
    inputs.push(vk_input(vk, KEYEVENTF_KEYUP));
    for m in combo.modifiers.iter().rev() {
        inputs.push(vk_input(modifier_vk(*m), KEYEVENTF_KEYUP));
    }
    send_inputs(&inputs)
}

fn send_inputs(inputs: &[INPUT]) -> Result<()> {
    if inputs.is_empty() {
        return Ok(());
    }
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(Error::WindowOperation(format!(
            "SendInput delivered {sent} of {} events",
            inputs.len()
        )));
    }
    Ok(())
}

fn unicode_input(unit: u16, extra: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wScan: unit,
                dwFlags: KEYEVENTF_UNICODE | extra,
                ..Default::default()
            },
        },
    }
}

fn vk_input(vk: VIRTUAL_KEY, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                dwFlags: flags,
                ..Default::default()
            },
        },
    }
}

fn modifier_vk(m: Modifier) -> VIRTUAL_KEY {
    match m {
        Modifier::Ctrl => VK_CONTROL,
        Modifier::Alt => VK_MENU,
        Modifier::Shift => VK_SHIFT,
        Modifier::Meta => VK_LWIN,
    }
}

fn key_vk(key: &Key) -> Result<VIRTUAL_KEY> {
    let vk = match key {
        Key::Enter => VK_RETURN,
        Key::Tab => VK_TAB,
        Key::Escape => VK_ESCAPE,
        Key::Backspace => VK_BACK,
        Key::Delete => VK_DELETE,
        Key::Home => VK_HOME,
        Key::End => VK_END,
        Key::PageUp => VK_PRIOR,
        Key::PageDown => VK_NEXT,
        Key::Up => VK_UP,
        Key::Down => VK_DOWN,
        Key::Left => VK_LEFT,
        Key::Right => VK_RIGHT,
        Key::F(n) if (1..=24).contains(n) => VIRTUAL_KEY(VK_F1.0 + (*n as u16 - 1)),
        Key::F(n) => {
            return Err(Error::WindowOperation(format!("no virtual key for F{n}")));
        }
        Key::Char(c) => {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_alphanumeric() {
                VIRTUAL_KEY(upper as u16)
            } else {
                return Err(Error::WindowOperation(format!(
                    "no virtual key mapping for '{c}'"
                )));
            }
        }
    };
    Ok(vk)
}
