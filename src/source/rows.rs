//! Delimited text rows to points.

use glam::{Vec3, Vec4};

use super::{ChannelSource, ColumnMap};

/// How one line of a text source maps to a point.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLayout {
    /// Field separator. Empty or whitespace-only means "split on runs of
    /// whitespace".
    pub separator: String,
    /// Column mapping.
    pub columns: ColumnMap,
    /// Factor applied to color columns. Zero means the source carries no
    /// color.
    pub color_scale: f32,
}

/// One accepted row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedRow {
    /// Point position.
    pub position: Vec3,
    /// Color, when the layout is colored and every referenced color field
    /// parsed.
    pub color: Option<Vec4>,
}

impl RowLayout {
    /// Uncolored layout.
    #[must_use]
    pub fn new(separator: impl Into<String>, columns: ColumnMap) -> Self {
        Self {
            separator: separator.into(),
            columns,
            color_scale: 0.0,
        }
    }

    /// Same layout reading colors scaled by `scale`.
    #[must_use]
    pub fn with_color_scale(mut self, scale: f32) -> Self {
        self.color_scale = scale;
        self
    }

    /// Whether rows carry color.
    #[must_use]
    pub fn is_colored(&self) -> bool {
        self.color_scale != 0.0
    }

    /// Parse one line.
    ///
    /// Returns `None` for rows that are too short or whose position fields
    /// are not numbers. A row with a valid position but an unparsable color
    /// field is still returned, without color.
    #[must_use]
    pub fn parse(&self, line: &str) -> Option<ParsedRow> {
        let fields: Vec<&str> = if self.separator.trim().is_empty() {
            line.split_whitespace().collect()
        } else {
            line.split(self.separator.as_str()).collect()
        };
        let colored = self.is_colored();
        if fields.len() < self.columns.max_column(colored) {
            return None;
        }

        let field = |index: usize| -> Option<f32> {
            fields.get(index.checked_sub(1)?)?.trim().parse().ok()
        };
        let position = Vec3::new(
            field(self.columns.x)?,
            field(self.columns.y)?,
            field(self.columns.z)?,
        );

        let color = if colored {
            let channel = |source: ChannelSource| match source {
                ChannelSource::Column(i) => {
                    field(i).map(|v| v * self.color_scale)
                }
                ChannelSource::Constant(v) => Some(v),
            };
            let map = &self.columns;
            match (channel(map.r), channel(map.g), channel(map.b), channel(map.a))
            {
                (Some(r), Some(g), Some(b), Some(a)) => {
                    Some(Vec4::new(r, g, b, a))
                }
                _ => None,
            }
        } else {
            None
        };

        Some(ParsedRow { position, color })
    }
}
