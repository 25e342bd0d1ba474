//! Interaction with the card holder
//!
//! The credential manager never renders anything itself. Every prompt goes
//! through [`UserInterface`] and blocks until the user answers.

use zeroize::Zeroizing;

use crate::types::PinAttributes;

/// Answer to a message box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Cancelled,
}

/// Label and value of a PIN created alongside a new key
#[derive(Debug, Clone)]
pub struct NewPin {
    pub label: String,
    pub pin: Zeroizing<String>,
}

pub trait UserInterface {
    /// Show `text`; without `allow_cancel` the only answer is [`Confirmation::Confirmed`]
    fn show_message(&mut self, title: &str, text: &str, allow_cancel: bool) -> Confirmation;

    /// Let the user pick one of `options`, `None` on cancel
    fn choose_item(&mut self, title: &str, label: &str, options: &[&str]) -> Option<usize>;

    /// Ask for the label and value of a new PIN, `None` on cancel
    fn enter_new_pin(&mut self) -> Option<NewPin>;

    /// Ask for the value of `pin`, `None` on cancel
    fn enter_pin(&mut self, pin: &PinAttributes) -> Option<Zeroizing<Vec<u8>>>;
}

impl<U: UserInterface + ?Sized> UserInterface for &mut U {
    fn show_message(&mut self, title: &str, text: &str, allow_cancel: bool) -> Confirmation {
        (**self).show_message(title, text, allow_cancel)
    }

    fn choose_item(&mut self, title: &str, label: &str, options: &[&str]) -> Option<usize> {
        (**self).choose_item(title, label, options)
    }

    fn enter_new_pin(&mut self) -> Option<NewPin> {
        (**self).enter_new_pin()
    }

    fn enter_pin(&mut self, pin: &PinAttributes) -> Option<Zeroizing<Vec<u8>>> {
        (**self).enter_pin(pin)
    }
}
