use std::time::Duration;
use tracing::trace;

use crate::domain::{Message, TVConfig, TVError};
use crate::model::Model;
use ratatui::crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, MouseEvent, MouseEventKind,
};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &TVConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, TVError> {
        if !event::poll(Duration::from_millis(self.event_poll_time))? {
            return Ok(None);
        }
        Ok(self.map_event(model, event::read()?))
    }

    fn map_event(&self, model: &Model, event: Event) -> Option<Message> {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if model.raw_keyevents() {
                    Some(Message::RawKey(key))
                } else if model.is_filter_open() {
                    self.handle_popover_key(model, key)
                } else {
                    self.handle_key(key)
                }
            }
            Event::Mouse(mouse) => self.handle_mouse(model, mouse),
            Event::Resize(width, height) => Some(Message::Resize(width as usize, height as usize)),
            _ => None,
        }
    }

    fn handle_key(&self, key: KeyEvent) -> Option<Message> {
        let message = match key.code {
            KeyCode::Char('q') => Some(Message::Quit),
            KeyCode::Char('j') | KeyCode::Down => Some(Message::MoveDown),
            KeyCode::Char('k') | KeyCode::Up => Some(Message::MoveUp),
            KeyCode::Char('h') | KeyCode::Left => Some(Message::MoveLeft),
            KeyCode::Char('l') | KeyCode::Right => Some(Message::MoveRight),
            KeyCode::PageDown => Some(Message::MovePageDown),
            KeyCode::PageUp => Some(Message::MovePageUp),
            KeyCode::Char('g') | KeyCode::Home => Some(Message::MoveBeginning),
            KeyCode::Char('G') | KeyCode::End => Some(Message::MoveEnd),
            KeyCode::Char('0') => Some(Message::MoveToFirstColumn),
            KeyCode::Char('$') => Some(Message::MoveToLastColumn),
            KeyCode::Enter => Some(Message::Enter),
            KeyCode::Esc => Some(Message::Exit),
            KeyCode::Char('?') => Some(Message::Help),
            KeyCode::Char('/') => Some(Message::Search),
            KeyCode::Char('f') => Some(Message::OpenFilter),
            KeyCode::Char('F') => Some(Message::ClearFilters),
            KeyCode::Char('[') => Some(Message::SortAscending),
            KeyCode::Char(']') => Some(Message::SortDescending),
            KeyCode::Char('c') => Some(Message::ToggleColumnState),
            KeyCode::Char('C') => Some(Message::ToggleExpandColumnState),
            KeyCode::Char('i') => Some(Message::ToggleIndex),
            KeyCode::Char('y') => Some(Message::CopyCell),
            KeyCode::Char('Y') => Some(Message::CopyRow),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }

    fn handle_popover_key(&self, model: &Model, key: KeyEvent) -> Option<Message> {
        let message = match key.code {
            KeyCode::Char('j') | KeyCode::Down => Some(Message::MoveDown),
            KeyCode::Char('k') | KeyCode::Up => Some(Message::MoveUp),
            KeyCode::PageDown => Some(Message::MovePageDown),
            KeyCode::PageUp => Some(Message::MovePageUp),
            KeyCode::Char(' ') | KeyCode::Enter => Some(Message::ToggleOption),
            KeyCode::Char('a') => Some(Message::SelectAll),
            KeyCode::Char('n') => Some(Message::DeselectAll),
            KeyCode::Char('x') => Some(Message::ClearColumnFilter),
            KeyCode::Char('q') => Some(Message::ClosePopover),
            KeyCode::Esc if model.listeners().listens_for_escape() => Some(Message::ClosePopover),
            _ => None,
        };
        trace!("Mapped popover key: {key:?} => {message:?}");
        message
    }

    fn handle_mouse(&self, model: &Model, mouse: MouseEvent) -> Option<Message> {
        match mouse.kind {
            MouseEventKind::Down(_) if model.listeners().is_outside(mouse.column, mouse.row) => {
                trace!("Pointer down outside at {}:{}", mouse.column, mouse.row);
                Some(Message::ClosePopover)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::value::{Row, Value};
    use ratatui::crossterm::event::{KeyModifiers, MouseButton};

    fn model() -> Model {
        let rows: Vec<Row> = ["ACTIVO", "VENCIDO"]
            .iter()
            .map(|s| [("estatus".to_string(), Value::from(*s))].into_iter().collect())
            .collect();
        let mut model = Model::init(&TVConfig::default(), 80, 24);
        model.set_dataset(Dataset::new("t", vec!["estatus".to_string()], rows));
        model
    }

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn click(column: u16, row: u16) -> Event {
        Event::Mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            modifiers: KeyModifiers::NONE,
        })
    }

    #[test]
    fn maps_table_keys() {
        let controller = Controller::new(&TVConfig::default());
        let model = model();
        assert_eq!(controller.map_event(&model, key(KeyCode::Char('f'))), Some(Message::OpenFilter));
        assert_eq!(controller.map_event(&model, key(KeyCode::Char('/'))), Some(Message::Search));
        assert_eq!(controller.map_event(&model, key(KeyCode::Esc)), Some(Message::Exit));
        assert_eq!(controller.map_event(&model, Event::Resize(100, 40)), Some(Message::Resize(100, 40)));
        // No popover, nothing listens for clicks
        assert_eq!(controller.map_event(&model, click(70, 20)), None);
    }

    #[test]
    fn routes_keys_to_open_popover() {
        let controller = Controller::new(&TVConfig::default());
        let mut model = model();
        model.update(Some(Message::OpenFilter)).unwrap();
        assert_eq!(controller.map_event(&model, key(KeyCode::Char(' '))), Some(Message::ToggleOption));
        assert_eq!(controller.map_event(&model, key(KeyCode::Char('n'))), Some(Message::DeselectAll));
        assert_eq!(controller.map_event(&model, key(KeyCode::Esc)), Some(Message::ClosePopover));
        assert_eq!(controller.map_event(&model, click(79, 22)), Some(Message::ClosePopover));
        let area = model.get_uidata().filter_popover.as_ref().unwrap().area;
        assert_eq!(controller.map_event(&model, click(area.x + 1, area.y + 1)), None);
    }

    #[test]
    fn passes_raw_keys_to_the_command_line() {
        let controller = Controller::new(&TVConfig::default());
        let mut model = model();
        model.update(Some(Message::Search)).unwrap();
        assert!(matches!(
            controller.map_event(&model, key(KeyCode::Char('q'))),
            Some(Message::RawKey(_))
        ));
    }
}
