use serde::Serialize;
use taskwire_core::{DialogInput, Prompt};

use crate::commands::encode_callback;
use crate::model::{InlineKeyboardButton, InlineKeyboardMarkup};

const SELECTED_MARK: &str = "\u{2714} ";

/// A prompt rendered for `sendMessage` / `editMessageText`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Default)]
pub struct KeyboardBuilder {
    rows: Vec<Vec<InlineKeyboardButton>>,
}

impl KeyboardBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut RowBuilder),
    {
        let mut row = RowBuilder::default();
        build(&mut row);
        if !row.buttons.is_empty() {
            self.rows.push(row.buttons);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn build(self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup { inline_keyboard: self.rows }
    }
}

#[derive(Default)]
pub struct RowBuilder {
    buttons: Vec<InlineKeyboardButton>,
}

impl RowBuilder {
    /// Adds a button; inputs without a callback form are ignored.
    pub fn button(&mut self, label: impl Into<String>, input: &DialogInput) -> &mut Self {
        if let Some(callback_data) = encode_callback(input) {
            self.buttons.push(InlineKeyboardButton { text: label.into(), callback_data });
        }
        self
    }
}

/// One option per row, then a row of the prompt's controls and a cancel button.
///
/// Multi-select options toggle and show a check mark while selected.
pub fn prompt_keyboard(prompt: &Prompt) -> InlineKeyboardMarkup {
    let controls = prompt.controls;
    let mut keyboard = KeyboardBuilder::new();

    for (index, option) in prompt.options.iter().enumerate() {
        keyboard = keyboard.row(|row| {
            if controls.multi_select {
                let mark = if prompt.is_selected(option) { SELECTED_MARK } else { "" };
                row.button(format!("{mark}{}", option.label), &DialogInput::Toggle(index));
            } else {
                row.button(option.label.clone(), &DialogInput::Select(index));
            }
        });
    }

    keyboard
        .row(|row| {
            if controls.new_label {
                row.button("New label", &DialogInput::NewLabel);
            }
            if controls.others {
                row.button("Others", &DialogInput::Others);
            }
        })
        .row(|row| {
            if controls.multi_select {
                row.button("Done", &DialogInput::Done);
            }
            if controls.skip {
                row.button("Skip", &DialogInput::Skip);
            }
            if controls.retry {
                row.button("Retry", &DialogInput::Retry);
            }
            row.button("Cancel", &DialogInput::Cancel);
        })
        .build()
}

pub fn render_prompt(prompt: &Prompt) -> PromptMessage {
    PromptMessage { text: prompt.text.clone(), reply_markup: Some(prompt_keyboard(prompt)) }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use taskwire_core::flows::PromptControls;
    use taskwire_core::{OptionItem, Prompt};

    use super::{prompt_keyboard, render_prompt, KeyboardBuilder};

    fn labels(prompt: &Prompt) -> Vec<Vec<(String, String)>> {
        prompt_keyboard(prompt)
            .inline_keyboard
            .into_iter()
            .map(|row| row.into_iter().map(|button| (button.text, button.callback_data)).collect())
            .collect()
    }

    #[test]
    fn single_select_options_map_to_indexed_selections() {
        let prompt = Prompt::text("Select the project:")
            .with_options(vec![
                OptionItem::new("Engineering", "ENG"),
                OptionItem::new("Operations", "OPS"),
            ])
            .with_controls(PromptControls { skip: true, ..PromptControls::default() });

        assert_eq!(
            labels(&prompt),
            vec![
                vec![("Engineering".to_owned(), "sel|0".to_owned())],
                vec![("Operations".to_owned(), "sel|1".to_owned())],
                vec![
                    ("Skip".to_owned(), "skip".to_owned()),
                    ("Cancel".to_owned(), "cancel".to_owned())
                ],
            ]
        );
    }

    #[test]
    fn multi_select_marks_selected_options_and_offers_done() {
        let mut prompt = Prompt::text("Choose labels:")
            .with_options(vec![OptionItem::plain("backend"), OptionItem::plain("urgent")])
            .with_controls(PromptControls {
                multi_select: true,
                skip: true,
                new_label: true,
                ..PromptControls::default()
            });
        prompt.selected = BTreeSet::from(["urgent".to_owned()]);

        let rows = labels(&prompt);
        assert_eq!(rows[0], vec![("backend".to_owned(), "tgl|0".to_owned())]);
        assert_eq!(rows[1], vec![("\u{2714} urgent".to_owned(), "tgl|1".to_owned())]);
        assert_eq!(rows[2], vec![("New label".to_owned(), "lbl_new".to_owned())]);
        let controls: Vec<&str> = rows[3].iter().map(|(_, data)| data.as_str()).collect();
        assert_eq!(controls, vec!["done", "skip", "cancel"]);
    }

    #[test]
    fn retry_prompt_offers_retry_and_cancel() {
        let prompt = Prompt::text("Failed to create task: boom")
            .with_controls(PromptControls { retry: true, ..PromptControls::default() });

        let rendered = render_prompt(&prompt);
        assert_eq!(rendered.text, "Failed to create task: boom");
        let keyboard = rendered.reply_markup.expect("keyboard");
        let data: Vec<&str> =
            keyboard.inline_keyboard[0].iter().map(|button| button.callback_data.as_str()).collect();
        assert_eq!(data, vec!["retry", "cancel"]);
    }

    #[test]
    fn empty_rows_are_dropped() {
        let keyboard = KeyboardBuilder::new().row(|_| {});
        assert!(keyboard.is_empty());
    }
}
