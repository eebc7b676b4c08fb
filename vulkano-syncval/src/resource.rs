//! The registry of buffers and images whose accesses are tracked.
//!
//! Resources live in an arena and are referred to by [`Id`]. Destroying a resource only marks it
//! as destroyed: access records that refer to it stay valid, and later accesses to it are
//! ignored.

use crate::{
    macros::vulkan_bitflags, DeviceSize, Id, NonExhaustive, ValidationError,
};
use smallvec::SmallVec;
use std::{cmp, ops::Range};

/// A buffer known to the validator.
#[derive(Debug)]
pub struct Buffer {
    size: DeviceSize,
    destroyed: bool,
}

impl Buffer {
    /// Returns the size of the buffer in bytes.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    /// Returns whether the buffer has been destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// Parameters to create a new [`Buffer`].
#[derive(Clone, Debug)]
pub struct BufferCreateInfo {
    /// The size in bytes of the buffer.
    ///
    /// The default value is `0`, which must be overridden.
    pub size: DeviceSize,

    pub _ne: NonExhaustive,
}

impl Default for BufferCreateInfo {
    #[inline]
    fn default() -> Self {
        BufferCreateInfo {
            size: 0,
            _ne: NonExhaustive(()),
        }
    }
}

/// An image known to the validator.
#[derive(Debug)]
pub struct Image {
    aspects: ImageAspects,
    mip_levels: u32,
    array_layers: u32,
    destroyed: bool,
}

impl Image {
    /// Returns the aspects of the image.
    #[inline]
    pub fn aspects(&self) -> ImageAspects {
        self.aspects
    }

    /// Returns the number of mip levels of the image.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Returns the number of array layers of the image.
    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Returns whether the image has been destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Returns the range covering every subresource of the image.
    #[inline]
    pub fn subresource_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: self.aspects,
            mip_levels: 0..self.mip_levels,
            array_layers: 0..self.array_layers,
        }
    }

    // Number of subresources, which is the length of the linear index space of the image.
    fn subresource_count(&self) -> u64 {
        self.aspect_list().len() as u64 * u64::from(self.mip_levels) * u64::from(self.array_layers)
    }

    fn aspect_list(&self) -> SmallVec<[ImageAspects; 3]> {
        self.aspects.iter().collect()
    }

    /// Returns the linear index ranges covered by `subresource_range`, clamped to the image.
    ///
    /// Subresources are linearized aspect-major, then by mip level, then by array layer, so a
    /// range of layers of one mip level of one aspect is contiguous.
    pub(crate) fn iter_ranges(
        &self,
        subresource_range: &ImageSubresourceRange,
    ) -> SmallVec<[Range<u64>; 4]> {
        let mip_levels = clamp_range(&subresource_range.mip_levels, self.mip_levels);
        let array_layers = clamp_range(&subresource_range.array_layers, self.array_layers);
        let layers = u64::from(self.array_layers);
        let mut ranges: SmallVec<[Range<u64>; 4]> = SmallVec::new();

        if mip_levels.is_empty() || array_layers.is_empty() {
            return ranges;
        }

        for (aspect_index, aspect) in self.aspect_list().into_iter().enumerate() {
            if !subresource_range.aspects.contains(aspect) {
                continue;
            }

            let aspect_base = aspect_index as u64 * u64::from(self.mip_levels);

            for mip_level in mip_levels.clone() {
                let base = (aspect_base + u64::from(mip_level)) * layers;
                let range =
                    base + u64::from(array_layers.start)..base + u64::from(array_layers.end);

                match ranges.last_mut() {
                    Some(last) if last.end == range.start => last.end = range.end,
                    _ => ranges.push(range),
                }
            }
        }

        ranges
    }
}

fn clamp_range(range: &Range<u32>, len: u32) -> Range<u32> {
    cmp::min(range.start, len)..cmp::min(range.end, len)
}

/// Parameters to create a new [`Image`].
#[derive(Clone, Debug)]
pub struct ImageCreateInfo {
    /// The aspects of the image's format.
    ///
    /// The default value is [`ImageAspects::COLOR`].
    pub aspects: ImageAspects,

    /// The number of mip levels.
    ///
    /// The default value is `1`.
    pub mip_levels: u32,

    /// The number of array layers.
    ///
    /// The default value is `1`.
    pub array_layers: u32,

    pub _ne: NonExhaustive,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        ImageCreateInfo {
            aspects: ImageAspects::COLOR,
            mip_levels: 1,
            array_layers: 1,
            _ne: NonExhaustive(()),
        }
    }
}

impl ImageCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        let &Self {
            aspects,
            mip_levels,
            array_layers,
            _ne: _,
        } = self;

        if aspects.is_empty() {
            return Err(Box::new(ValidationError {
                context: "aspects".into(),
                problem: "is empty".into(),
                ..Default::default()
            }));
        }

        if aspects.contains(ImageAspects::COLOR)
            && aspects.intersects(ImageAspects::DEPTH | ImageAspects::STENCIL)
        {
            return Err(Box::new(ValidationError {
                context: "aspects".into(),
                problem: "contains both a color aspect and a depth or stencil aspect".into(),
                ..Default::default()
            }));
        }

        if mip_levels == 0 {
            return Err(Box::new(ValidationError {
                context: "mip_levels".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkImageCreateInfo-mipLevels-00947"],
            }));
        }

        if array_layers == 0 {
            return Err(Box::new(ValidationError {
                context: "array_layers".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkImageCreateInfo-arrayLayers-00948"],
            }));
        }

        Ok(())
    }
}

vulkan_bitflags! {
    /// A set of aspects of an image.
    ImageAspects = ImageAspectFlags(u32);

    COLOR = COLOR,
    DEPTH = DEPTH,
    STENCIL = STENCIL,
}

/// A range of subresources of an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    /// The aspects of the image selected by the range.
    pub aspects: ImageAspects,

    /// The mip levels selected by the range.
    pub mip_levels: Range<u32>,

    /// The array layers selected by the range.
    pub array_layers: Range<u32>,
}

impl ImageSubresourceRange {
    /// Returns a range that selects every subresource of any image.
    #[inline]
    pub fn whole() -> Self {
        ImageSubresourceRange {
            aspects: ImageAspects::all(),
            mip_levels: 0..u32::MAX,
            array_layers: 0..u32::MAX,
        }
    }

    /// Returns whether `self` and `other` select at least one common subresource.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.aspects.intersects(other.aspects)
            && ranges_overlap(&self.mip_levels, &other.mip_levels)
            && ranges_overlap(&self.array_layers, &other.array_layers)
    }

    /// Returns whether every subresource selected by `other` is also selected by `self`.
    pub fn contains(&self, other: &Self) -> bool {
        self.aspects.contains(other.aspects)
            && range_contains(&self.mip_levels, &other.mip_levels)
            && range_contains(&self.array_layers, &other.array_layers)
    }
}

fn ranges_overlap<T: Ord>(a: &Range<T>, b: &Range<T>) -> bool {
    a.start < a.end && b.start < b.end && a.start < b.end && b.start < a.end
}

fn range_contains<T: Ord>(outer: &Range<T>, inner: &Range<T>) -> bool {
    inner.start >= inner.end || (outer.start <= inner.start && inner.end <= outer.end)
}

/// Identifies the resource whose storage is accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Buffer(Id<Buffer>),
    Image(Id<Image>),
}

/// A region of storage: a byte range of a buffer or a subresource range of an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    Buffer {
        buffer: Id<Buffer>,
        range: Range<DeviceSize>,
    },
    Image {
        image: Id<Image>,
        subresource_range: ImageSubresourceRange,
    },
}

impl StorageLocation {
    /// Returns a location covering `range` of `buffer`.
    #[inline]
    pub fn buffer(buffer: Id<Buffer>, range: Range<DeviceSize>) -> Self {
        StorageLocation::Buffer { buffer, range }
    }

    /// Returns a location covering `subresource_range` of `image`.
    #[inline]
    pub fn image(image: Id<Image>, subresource_range: ImageSubresourceRange) -> Self {
        StorageLocation::Image {
            image,
            subresource_range,
        }
    }

    /// Returns the resource the location belongs to.
    #[inline]
    pub fn key(&self) -> ResourceKey {
        match *self {
            StorageLocation::Buffer { buffer, .. } => ResourceKey::Buffer(buffer),
            StorageLocation::Image { image, .. } => ResourceKey::Image(image),
        }
    }

    /// Returns whether `self` and `other` share any storage.
    pub fn overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (
                StorageLocation::Buffer { buffer, range },
                StorageLocation::Buffer {
                    buffer: other_buffer,
                    range: other_range,
                },
            ) => buffer == other_buffer && ranges_overlap(range, other_range),
            (
                StorageLocation::Image {
                    image,
                    subresource_range,
                },
                StorageLocation::Image {
                    image: other_image,
                    subresource_range: other_subresource_range,
                },
            ) => image == other_image && subresource_range.overlaps(other_subresource_range),
            _ => false,
        }
    }

    /// Returns whether all storage of `other` is part of `self`.
    pub fn contains(&self, other: &Self) -> bool {
        match (self, other) {
            (
                StorageLocation::Buffer { buffer, range },
                StorageLocation::Buffer {
                    buffer: other_buffer,
                    range: other_range,
                },
            ) => buffer == other_buffer && range_contains(range, other_range),
            (
                StorageLocation::Image {
                    image,
                    subresource_range,
                },
                StorageLocation::Image {
                    image: other_image,
                    subresource_range: other_subresource_range,
                },
            ) => image == other_image && subresource_range.contains(other_subresource_range),
            _ => false,
        }
    }
}

/// The arena holding every buffer and image known to the validator.
#[derive(Debug, Default)]
pub struct Resources {
    buffers: Vec<Buffer>,
    images: Vec<Image>,
}

impl Resources {
    /// Registers a new buffer.
    pub fn create_buffer(
        &mut self,
        create_info: BufferCreateInfo,
    ) -> Result<Id<Buffer>, Box<ValidationError>> {
        if create_info.size == 0 {
            return Err(Box::new(ValidationError {
                context: "create_info.size".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkBufferCreateInfo-size-00912"],
            }));
        }

        let id = Id::new(self.buffers.len());
        self.buffers.push(Buffer {
            size: create_info.size,
            destroyed: false,
        });

        Ok(id)
    }

    /// Registers a new image.
    pub fn create_image(
        &mut self,
        create_info: ImageCreateInfo,
    ) -> Result<Id<Image>, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        let id = Id::new(self.images.len());
        self.images.push(Image {
            aspects: create_info.aspects,
            mip_levels: create_info.mip_levels,
            array_layers: create_info.array_layers,
            destroyed: false,
        });

        Ok(id)
    }

    /// Marks the buffer as destroyed. Further accesses to it are ignored.
    pub fn destroy_buffer(&mut self, id: Id<Buffer>) -> Result<(), Box<ValidationError>> {
        match self.buffers.get_mut(id.index()) {
            Some(buffer) if !buffer.destroyed => {
                buffer.destroyed = true;
                Ok(())
            }
            _ => Err(invalid_id("id")),
        }
    }

    /// Marks the image as destroyed. Further accesses to it are ignored.
    pub fn destroy_image(&mut self, id: Id<Image>) -> Result<(), Box<ValidationError>> {
        match self.images.get_mut(id.index()) {
            Some(image) if !image.destroyed => {
                image.destroyed = true;
                Ok(())
            }
            _ => Err(invalid_id("id")),
        }
    }

    #[inline]
    pub fn buffer(&self, id: Id<Buffer>) -> Option<&Buffer> {
        self.buffers.get(id.index())
    }

    #[inline]
    pub fn image(&self, id: Id<Image>) -> Option<&Image> {
        self.images.get(id.index())
    }

    /// Returns whether the resource is unknown or destroyed.
    pub(crate) fn is_gone(&self, key: ResourceKey) -> bool {
        match key {
            ResourceKey::Buffer(id) => self.buffer(id).map_or(true, Buffer::is_destroyed),
            ResourceKey::Image(id) => self.image(id).map_or(true, Image::is_destroyed),
        }
    }

    /// Returns the linear index range covering the whole resource.
    pub(crate) fn full_range(&self, key: ResourceKey) -> Range<u64> {
        match key {
            ResourceKey::Buffer(id) => 0..self.buffer(id).map_or(0, Buffer::size),
            ResourceKey::Image(id) => 0..self.image(id).map_or(0, Image::subresource_count),
        }
    }

    /// Returns the linear index ranges of the storage at `location`, clamped to the resource.
    pub(crate) fn iter_ranges(&self, location: &StorageLocation) -> SmallVec<[Range<u64>; 4]> {
        match location {
            StorageLocation::Buffer { buffer, range } => {
                let size = self.buffer(*buffer).map_or(0, Buffer::size);
                let range = cmp::min(range.start, size)..cmp::min(range.end, size);

                if range.is_empty() {
                    SmallVec::new()
                } else {
                    smallvec::smallvec![range]
                }
            }
            StorageLocation::Image {
                image,
                subresource_range,
            } => self
                .image(*image)
                .map(|image| image.iter_ranges(subresource_range))
                .unwrap_or_default(),
        }
    }

    /// Checks that `location` refers to a known resource and lies within its bounds.
    pub(crate) fn validate_location(
        &self,
        location: &StorageLocation,
    ) -> Result<(), Box<ValidationError>> {
        match location {
            StorageLocation::Buffer { buffer, range } => {
                let Some(buffer) = self.buffer(*buffer) else {
                    return Err(invalid_id("buffer"));
                };

                // Accesses to destroyed resources are skipped when replayed.
                if buffer.is_destroyed() {
                    return Ok(());
                }

                // A range ending at `DeviceSize::MAX` extends to the end of the buffer.
                let end = if range.end == DeviceSize::MAX {
                    buffer.size()
                } else {
                    range.end
                };

                if range.start >= end {
                    return Err(Box::new(ValidationError {
                        context: "range".into(),
                        problem: "is empty".into(),
                        ..Default::default()
                    }));
                }

                if end > buffer.size() {
                    return Err(Box::new(ValidationError {
                        context: "range".into(),
                        problem: "is not within the buffer".into(),
                        ..Default::default()
                    }));
                }
            }
            StorageLocation::Image {
                image,
                subresource_range,
            } => {
                let Some(image) = self.image(*image) else {
                    return Err(invalid_id("image"));
                };

                if image.is_destroyed() {
                    return Ok(());
                }

                if image.iter_ranges(subresource_range).is_empty() {
                    return Err(Box::new(ValidationError {
                        context: "subresource_range".into(),
                        problem: "does not select any subresource of the image".into(),
                        ..Default::default()
                    }));
                }
            }
        }

        Ok(())
    }
}

fn invalid_id(context: &'static str) -> Box<ValidationError> {
    Box::new(ValidationError {
        context: context.into(),
        problem: "does not refer to a live resource".into(),
        ..Default::default()
    })
}
