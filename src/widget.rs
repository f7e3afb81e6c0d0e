use eframe::egui::{Button, Color32, Label, RichText, Rounding};


pub fn get_reading_label(profile: &str, value: &str) -> Label {
    let reading_text = RichText::new(format!("{profile}: {value}"))
        .color(Color32::RED)
        .background_color(Color32::WHITE)
        .size(40.0);

    Label::new(reading_text)
}

pub fn get_profile_button(label: &str) -> Button<'static> {
    let profile_text = RichText::new(format!("Connect {label} device"))
        .color(Color32::WHITE)
        .size(20.0);

    Button::new(profile_text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
        .selected(false)
}

pub fn get_active_session_label(profile: &str, state: &str) -> Label {
    let session_text = RichText::new(format!("{profile} - {state}"))
        .color(Color32::WHITE)
        .background_color(Color32::RED)
        .size(20.0);

    Label::new(session_text)
}

pub fn get_stop_session_button(profile: &str) -> Button<'static> {
    let text = RichText::new(stop_session_text(profile))
        .color(Color32::WHITE)
        .size(20.0);

    Button::new(text)
        .fill(Color32::DARK_RED)
        .rounding(Rounding::same(8.0))
}

fn stop_session_text(profile: &str) -> String {
    format!("Stop {profile}")
}

pub fn get_notice_label(notice: &str) -> Label {
    Label::new(RichText::new(notice).color(Color32::YELLOW).size(16.0))
}

pub fn get_unsupported_label() -> Label {
    let text = RichText::new("Bluetooth is not supported on this system")
        .color(Color32::RED)
        .size(24.0);

    Label::new(text)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_button_names_the_profile() {
        assert_eq!(stop_session_text("SpO2"), "Stop SpO2");
    }
}
