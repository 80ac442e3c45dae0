use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{
        Block, BorderType, Cell, Clear, Paragraph, Row, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Table, Wrap,
    },
};

use crate::domain::CMDMode;
use crate::filter::FilterState;
use crate::model::{Model, PopoverData, UIData};

pub const CMDLINE_HEIGH: usize = 2; // Status line and command line
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const SCROLLBAR_WIDTH: usize = 1;
pub const COLUMN_WIDTH_MARGIN: usize = 1;
pub const COLUMN_WIDTH_COLLAPSED_COLUMN: usize = 3;

#[derive(Debug, Default)]
pub struct TableUI {}

impl TableUI {
    pub fn new() -> Self {
        Self {}
    }

    pub fn draw(&self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let [table_area, status_area, cmd_area] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(frame.area());

        let [index_area, data_area, scrollbar_area] = Layout::horizontal([
            Constraint::Length(uidata.layout.index_width as u16),
            Constraint::Min(0),
            Constraint::Length(SCROLLBAR_WIDTH as u16),
        ])
        .areas(table_area);

        if uidata.layout.index_width > 0 {
            self.draw_index(uidata, frame, index_area);
        }
        self.draw_table(uidata, frame, data_area);
        self.draw_scrollbar(uidata, frame, scrollbar_area);
        self.draw_statusline(uidata, frame, status_area);
        self.draw_cmdline(uidata, frame, cmd_area);

        if let Some(popover) = &uidata.filter_popover {
            self.draw_filter_popover(popover, frame);
        }
        if uidata.show_popup {
            self.draw_popup(&uidata.popup_message, frame);
        }
    }

    fn draw_index(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let mut lines = vec![Line::from(uidata.index.name.as_str()).bold()];
        lines.extend(uidata.index.data.iter().enumerate().map(|(idx, n)| {
            let line = Line::from(n.as_str()).dark_gray();
            if idx == uidata.selected_row {
                line.bold()
            } else {
                line
            }
        }));
        frame.render_widget(Paragraph::new(lines).alignment(Alignment::Right), area);
    }

    fn draw_table(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let header = Row::new(uidata.table.iter().map(|c| {
            let style = if c.filtered {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            };
            Cell::from(c.name.as_str()).style(style)
        }))
        .height(TABLE_HEADER_HEIGHT as u16);

        let nrows = uidata.table.first().map(|c| c.data.len()).unwrap_or(0);
        let rows = (0..nrows).map(|r| {
            let row = Row::new(uidata.table.iter().enumerate().map(|(cidx, c)| {
                let cell = Cell::from(c.data.get(r).map(String::as_str).unwrap_or(""));
                if r == uidata.selected_row && cidx == uidata.selected_column {
                    cell.reversed()
                } else {
                    cell
                }
            }));
            if r == uidata.selected_row {
                row.style(Style::default().bg(Color::DarkGray))
            } else {
                row
            }
        });

        let widths = uidata
            .table
            .iter()
            .map(|c| Constraint::Length(c.width as u16));
        let table = Table::new(rows, widths).header(header).column_spacing(1);
        frame.render_widget(table, area);

        if nrows == 0 && area.height > TABLE_HEADER_HEIGHT as u16 {
            let message = if uidata.total_rows == 0 {
                "No data"
            } else {
                "No rows match the current search and filters"
            };
            let body = Rect {
                y: area.y + TABLE_HEADER_HEIGHT as u16,
                height: area.height - TABLE_HEADER_HEIGHT as u16,
                ..area
            };
            frame.render_widget(
                Paragraph::new(message).italic().dark_gray().alignment(Alignment::Center),
                body,
            );
        }
    }

    fn draw_scrollbar(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let mut state = ScrollbarState::new(uidata.nrows).position(uidata.abs_selected_row);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area,
            &mut state,
        );
    }

    fn draw_statusline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let mut spans = vec![
            Span::from(format!(" {} ", uidata.name)).bold().reversed(),
            Span::from(format!(" {}/{} rows ", uidata.nrows, uidata.total_rows)),
        ];
        if uidata.active_filters > 0 {
            spans.push(
                Span::from(format!(" {} filters ", uidata.active_filters))
                    .black()
                    .on_yellow(),
            );
        }
        if !uidata.query.is_empty() && !uidata.active_cmdinput {
            spans.push(Span::from(format!(" /{} ", uidata.query)).cyan());
        }
        spans.push(Span::from(format!(" {}", uidata.status_message)).dark_gray());
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_cmdline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if !uidata.active_cmdinput {
            frame.render_widget(
                Paragraph::new("? help  / search  f filter  q quit").dark_gray(),
                area,
            );
            return;
        }
        let prefix = match uidata.cmd_mode {
            Some(CMDMode::Search) => "/",
            None => ":",
        };
        let input = &uidata.cmdinput.input;
        frame.render_widget(Paragraph::new(format!("{prefix}{input}")), area);

        let cursor_x = area.x as usize + prefix.len() + uidata.cmdinput.curser_pos;
        frame.set_cursor_position(Position::new(
            cursor_x.min(area.right().saturating_sub(1) as usize) as u16,
            area.y,
        ));
    }

    fn draw_filter_popover(&self, popover: &PopoverData, frame: &mut Frame) {
        let area = popover.area.intersection(frame.area());
        if area.is_empty() {
            return;
        }
        let state = match popover.state {
            FilterState::Unrestricted => "all",
            FilterState::PartiallyRestricted => "filtered",
            FilterState::FullyExcluding => "none",
        };
        let block = Block::bordered()
            .border_type(BorderType::Rounded)
            .title(format!(" {} ", popover.title))
            .title_bottom(Line::from(format!(" {state} ")).right_aligned());
        let inner = block.inner(area);
        frame.render_widget(Clear, area);
        frame.render_widget(block, area);

        let [list_area, hint_area] =
            Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(inner);

        let lines: Vec<Line> = if popover.items.is_empty() {
            vec![Line::from("No values").italic().dark_gray()]
        } else {
            popover
                .items
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    let mark = if item.selected { "[x]" } else { "[ ]" };
                    let line = Line::from(vec![
                        Span::from(format!("{mark} {}", item.label)),
                        Span::from(format!(" ({})", item.count)).dark_gray(),
                    ]);
                    if idx == popover.cursor {
                        line.reversed()
                    } else {
                        line
                    }
                })
                .collect()
        };
        frame.render_widget(Paragraph::new(lines), list_area);
        frame.render_widget(
            Paragraph::new("␣ toggle a all n none x clear").dark_gray(),
            hint_area,
        );
    }

    fn draw_popup(&self, message: &str, frame: &mut Frame) {
        let text = Text::from(message);
        let width = (text.width() as u16 + 4).min(frame.area().width);
        let height = (text.height() as u16 + 2).min(frame.area().height);
        let [area] = Layout::horizontal([Constraint::Length(width)])
            .flex(ratatui::layout::Flex::Center)
            .areas(frame.area());
        let [area] = Layout::vertical([Constraint::Length(height)])
            .flex(ratatui::layout::Flex::Center)
            .areas(area);

        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .block(Block::bordered().border_type(BorderType::Rounded).title(" Help ")),
            area,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::domain::{Message, TVConfig};
    use crate::value::{Row, Value};
    use ratatui::{Terminal, backend::TestBackend};

    fn screen(model: &Model, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        let ui = TableUI::new();
        terminal.draw(|f| ui.draw(model, f)).unwrap();
        let buffer = terminal.backend().buffer();
        (0..height)
            .map(|y| {
                (0..width)
                    .map(|x| buffer[(x, y)].symbol().to_string())
                    .collect::<String>()
            })
            .collect::<Vec<String>>()
            .join("\n")
    }

    fn model() -> Model {
        let rows: Vec<Row> = ["ACTIVO", "VENCIDO", ""]
            .iter()
            .map(|s| [("estatus".to_string(), Value::from(*s))].into_iter().collect())
            .collect();
        let mut model = Model::init(&TVConfig::default(), 60, 16);
        model.set_dataset(Dataset::new("contratos", vec!["estatus".to_string()], rows));
        model
    }

    #[test]
    fn draws_header_rows_and_status() {
        let model = model();
        let screen = screen(&model, 60, 16);
        assert!(screen.contains("estatus"));
        assert!(screen.contains("VENCIDO"));
        assert!(screen.contains("3/3 rows"));
    }

    #[test]
    fn draws_filter_popover_with_checkboxes() {
        let mut model = model();
        model.update(Some(Message::OpenFilter)).unwrap();
        model.update(Some(Message::ToggleOption)).unwrap();
        let screen = screen(&model, 60, 16);
        assert!(screen.contains("[ ] Activo (1)"));
        assert!(screen.contains("[x] Vacío (1)"));
        assert!(screen.contains("2/3 rows"));
        assert!(screen.contains("1 filters"));
    }

    #[test]
    fn empty_result_shows_a_hint() {
        let mut model = model();
        model.set_query("nada que coincida");
        let screen = screen(&model, 60, 16);
        assert!(screen.contains("No rows match"));
        assert!(screen.contains("0/3 rows"));
    }
}
