use iced::widget::canvas::{self, Canvas, Path, Stroke};
use iced::{mouse, Element, Length, Point, Rectangle, Renderer, Theme};

use crate::gui::history::ScrollingBuffer;
use crate::gui::types::Message;

/// Seconds of history kept on screen.
const GRAPH_WINDOW: f32 = 30.0;

/// Vertical headroom above the set-point, which doubles as the top of the
/// y axis.
const HEADROOM: f32 = 1.2;

pub fn readback_graph<'a>(
    buffer: &'a ScrollingBuffer,
    setpoint: f64,
    now: f32,
) -> Element<'a, Message> {
    Canvas::new(ReadbackGraph { buffer, setpoint: setpoint as f32, now })
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}

/// Scrolling line graph of one readback quantity, scaled against the active
/// set-point.
struct ReadbackGraph<'a> {
    buffer: &'a ScrollingBuffer,
    setpoint: f32,
    now: f32,
}

fn max_y(setpoint: f32) -> f32 {
    (setpoint * HEADROOM).max(0.1)
}

fn vertical_scale(value: f32, max_y: f32, height: f32) -> f32 {
    height * (1.0 - (value / max_y).clamp(0.0, 1.0))
}

impl canvas::Program<Message> for ReadbackGraph<'_> {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<canvas::Geometry> {
        let mut frame = canvas::Frame::new(renderer, bounds.size());
        let palette = theme.extended_palette();
        let width = frame.width();
        let height = frame.height();
        let max_y = max_y(self.setpoint);

        frame.stroke(
            &Path::rectangle(Point::ORIGIN, frame.size()),
            Stroke::default().with_width(1.0).with_color(palette.background.strong.color),
        );

        // guide line at the set-point
        let guide_y = vertical_scale(self.setpoint, max_y, height);
        frame.stroke(
            &Path::line(Point::new(0.0, guide_y), Point::new(width, guide_y)),
            Stroke::default().with_width(1.0).with_color(palette.secondary.base.color),
        );

        let window_start = self.now - GRAPH_WINDOW;
        let trace = Path::new(|builder| {
            let mut first = true;
            for (timestamp, value) in self.buffer.iter() {
                if timestamp < window_start {
                    continue;
                }

                let x = (timestamp - window_start) / GRAPH_WINDOW * width;
                let y = vertical_scale(value, max_y, height);

                if first {
                    builder.move_to(Point::new(x, y));
                    first = false;
                } else {
                    builder.line_to(Point::new(x, y));
                }
            }
        });

        frame.stroke(
            &trace,
            Stroke::default().with_width(2.0).with_color(palette.primary.strong.color),
        );

        vec![frame.into_geometry()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_top_leaves_headroom_above_the_setpoint() {
        assert_eq!(max_y(5.0), 6.0);
        // a zero set-point must not collapse the axis
        assert_eq!(max_y(0.0), 0.1);
    }

    #[test]
    fn values_map_top_down_and_clamp_to_the_axis() {
        assert_eq!(vertical_scale(0.0, 6.0, 120.0), 120.0);
        assert_eq!(vertical_scale(6.0, 6.0, 120.0), 0.0);
        assert_eq!(vertical_scale(3.0, 6.0, 120.0), 60.0);
        // readings above the axis pin to the top instead of escaping it
        assert_eq!(vertical_scale(9.0, 6.0, 120.0), 0.0);
    }
}
