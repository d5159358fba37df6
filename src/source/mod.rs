//! Provenance of a cloud's point data.
//!
//! A [`SourceDescriptor`] records exactly how a cloud was filled so that the
//! data can be regenerated after the device buffers holding it are lost.

mod rows;

use std::path::PathBuf;

pub use rows::{ParsedRow, RowLayout};

use crate::error::CloudError;

/// Where one color channel of a loaded point comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelSource {
    /// 1-based column holding the channel value (scaled by the layout's
    /// color scale).
    Column(usize),
    /// The same value for every point.
    Constant(f32),
}

impl ChannelSource {
    /// Decode the scripting convention: a positive value is a 1-based column
    /// index, anything else is the negated constant (`-1.0` means a constant
    /// `1.0`).
    #[must_use]
    pub fn from_index(index: f32) -> Self {
        if index > 0.0 {
            Self::Column(index as usize)
        } else {
            Self::Constant(-index)
        }
    }

    fn column(self) -> Option<usize> {
        match self {
            Self::Column(i) => Some(i),
            Self::Constant(_) => None,
        }
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::Constant(1.0)
    }
}

/// Mapping from row fields to point coordinates and color channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnMap {
    /// 1-based column of the x coordinate.
    pub x: usize,
    /// 1-based column of the y coordinate.
    pub y: usize,
    /// 1-based column of the z coordinate.
    pub z: usize,
    /// Red channel.
    pub r: ChannelSource,
    /// Green channel.
    pub g: ChannelSource,
    /// Blue channel.
    pub b: ChannelSource,
    /// Alpha channel.
    pub a: ChannelSource,
}

impl ColumnMap {
    /// Position-only mapping; color channels default to constant 1.0.
    #[must_use]
    pub fn xyz(x: usize, y: usize, z: usize) -> Self {
        Self {
            x,
            y,
            z,
            r: ChannelSource::default(),
            g: ChannelSource::default(),
            b: ChannelSource::default(),
            a: ChannelSource::default(),
        }
    }

    /// Replace the four color channel sources.
    #[must_use]
    pub fn with_rgba(
        mut self,
        r: ChannelSource,
        g: ChannelSource,
        b: ChannelSource,
        a: ChannelSource,
    ) -> Self {
        self.r = r;
        self.g = g;
        self.b = b;
        self.a = a;
        self
    }

    /// Reject any column index below 1.
    ///
    /// # Errors
    ///
    /// [`CloudError::InvalidColumnIndex`] naming the first bad column.
    pub fn validate(&self) -> Result<(), CloudError> {
        let positions = [("x", self.x), ("y", self.y), ("z", self.z)];
        let channels = [("r", self.r), ("g", self.g), ("b", self.b), ("a", self.a)]
            .into_iter()
            .filter_map(|(name, c)| c.column().map(|i| (name, i)));
        for (column, index) in positions.into_iter().chain(channels) {
            if index < 1 {
                return Err(CloudError::InvalidColumnIndex { column, index });
            }
        }
        Ok(())
    }

    /// Highest column a row must have to be usable.
    #[must_use]
    pub fn max_column(&self, colored: bool) -> usize {
        let position = self.x.max(self.y).max(self.z);
        if !colored {
            return position;
        }
        [self.r, self.g, self.b, self.a]
            .into_iter()
            .filter_map(ChannelSource::column)
            .fold(position, usize::max)
    }
}

/// Recorded provenance of a cloud's data.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    /// Uniform random points in the unit cube.
    Random {
        /// Number of points.
        count: usize,
        /// Whether each point also gets a random color.
        colored: bool,
    },
    /// Delimited text file.
    File {
        /// Path as given by the caller (resolved at load time).
        path: PathBuf,
        /// Row format.
        layout: RowLayout,
    },
    /// Delimited text fetched by the network collaborator.
    Network {
        /// Resource URL.
        url: String,
        /// Row format.
        layout: RowLayout,
    },
}

impl SourceDescriptor {
    /// File source, or network source when `location` looks like a URL
    /// (contains `://`).
    #[must_use]
    pub fn from_location(location: &str, layout: RowLayout) -> Self {
        if location.contains("://") {
            Self::Network {
                url: location.to_owned(),
                layout,
            }
        } else {
            Self::File {
                path: PathBuf::from(location),
                layout,
            }
        }
    }

    /// Row layout of text-based sources.
    #[must_use]
    pub fn layout(&self) -> Option<&RowLayout> {
        match self {
            Self::Random { .. } => None,
            Self::File { layout, .. } | Self::Network { layout, .. } => {
                Some(layout)
            }
        }
    }

    /// Validate column indices of text-based sources.
    ///
    /// # Errors
    ///
    /// [`CloudError::InvalidColumnIndex`] if any index is below 1.
    pub fn validate(&self) -> Result<(), CloudError> {
        self.layout().map_or(Ok(()), |l| l.columns.validate())
    }
}
