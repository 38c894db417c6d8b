use ash::vk;

/// Returns the first memory type allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
}

const DEPTH_FORMATS: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

const DEPTH_STENCIL_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

/// Picks the highest precision depth format for which `supports` holds.
pub fn supported_depth_format(
    requires_stencil: bool,
    supports: impl Fn(vk::Format) -> bool,
) -> Option<vk::Format> {
    let candidates: &[vk::Format] = if requires_stencil {
        &DEPTH_STENCIL_FORMATS
    } else {
        &DEPTH_FORMATS
    };
    candidates.iter().copied().find(|format| supports(*format))
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, flags) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        props
    }

    fn fixture() -> vk::PhysicalDeviceMemoryProperties {
        memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn picks_first_matching_type() {
        let props = fixture();

        assert_eq!(
            find_memory_type_index(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(
            find_memory_type_index(&props, 0b1110, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(2)
        );
        assert_eq!(
            find_memory_type_index(&props, 0b1111, vk::MemoryPropertyFlags::HOST_CACHED),
            Some(3)
        );
    }

    #[test]
    fn no_match_returns_none() {
        let props = fixture();

        assert_eq!(
            find_memory_type_index(&props, 0b0011, vk::MemoryPropertyFlags::HOST_CACHED),
            None
        );
        assert_eq!(
            find_memory_type_index(&props, 0, vk::MemoryPropertyFlags::empty()),
            None
        );
        assert_eq!(
            find_memory_type_index(&props, 0b1_0000, vk::MemoryPropertyFlags::empty()),
            None
        );
    }

    #[test]
    fn result_is_always_the_lowest_valid_index() {
        let props = fixture();
        let requirements = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        ];

        for type_bits in 0..(1u32 << 5) {
            for required in requirements {
                let valid = (0..props.memory_type_count).filter(|&i| {
                    type_bits & (1 << i) != 0
                        && props.memory_types[i as usize].property_flags.contains(required)
                });
                assert_eq!(
                    find_memory_type_index(&props, type_bits, required),
                    valid.min(),
                    "type_bits={type_bits:#b} required={required:?}"
                );
            }
        }
    }

    #[test]
    fn depth_format_follows_preference_order() {
        let all = |_: vk::Format| true;
        assert_eq!(supported_depth_format(false, all), Some(vk::Format::D32_SFLOAT_S8_UINT));

        let no_combined = |format: vk::Format| !has_stencil_component(format);
        assert_eq!(supported_depth_format(false, no_combined), Some(vk::Format::D32_SFLOAT));
        assert_eq!(supported_depth_format(true, no_combined), None);

        let only_d24 = |format: vk::Format| format == vk::Format::D24_UNORM_S8_UINT;
        assert_eq!(supported_depth_format(true, only_d24), Some(vk::Format::D24_UNORM_S8_UINT));
    }
}
