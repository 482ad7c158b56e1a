use bws_core::{BwsError, MovementDirection, Warning};
use bws_session::{Message, View};

/// Prints session feedback to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleView {
    last_message: Option<Message>,
}

impl View for ConsoleView {
    fn request_camera_permission(&mut self) {
        println!("camera access requested");
    }

    fn show_camera_permission_denied(&mut self) {
        println!("camera access denied");
    }

    fn show_message(&mut self, message: Message) {
        // Repeated prompts would just scroll the terminal.
        if self.last_message != Some(message) {
            println!("{}", message.user_text());
            self.last_message = Some(message);
        }
    }

    fn hide_message(&mut self) {
        self.last_message = None;
    }

    fn show_movement_indicator(&mut self, direction: MovementDirection) {
        if direction != MovementDirection::Any {
            println!("  -> {direction}");
        }
    }

    fn hide_movement_indicator(&mut self) {}

    fn show_warning(&mut self, warning: Warning) {
        println!("warning: {}", warning.user_message());
    }

    fn show_error(&mut self, error: &BwsError) {
        println!("error: {}", error.user_message().unwrap_or("unexpected failure"));
        println!("  ({error})");
    }

    fn show_verification_success(&mut self) {
        println!("verified");
    }

    fn show_enrollment_success(&mut self) {
        println!("enrolled");
    }

    fn navigate_back(&mut self, success: bool) {
        self.last_message = None;
        if !success {
            println!("attempt failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_message_is_remembered_until_hidden() {
        let mut view = ConsoleView::default();
        view.show_message(Message::Uploading);
        view.show_message(Message::Uploading);
        assert_eq!(view.last_message, Some(Message::Uploading));
        view.hide_message();
        assert_eq!(view.last_message, None);

        view.show_message(Message::Verifying);
        view.navigate_back(true);
        assert_eq!(view.last_message, None);
    }
}
