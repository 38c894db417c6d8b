use std::ffi::{c_char, c_void, CStr};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use ash::vk;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use crate::renderer::core::device::{self, Accelerator};
use crate::renderer::core::error::HarnessError;
use crate::renderer::platform::PlatformWindow;

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    // Read by the messenger through its user data, so it is dropped after the instance
    _validation_log: Option<Box<ValidationLog>>,
}

impl RenderInstance {
    const VALIDATION_LAYER: &'static CStr = c"VK_LAYER_KHRONOS_validation";
    const APPLICATION_NAME: &'static CStr = c"vkframe";

    pub fn new(
        window: Option<&dyn PlatformWindow>,
        validation: bool,
        validation_log: Option<&Path>,
        api_version: u32,
        extra_extensions: &[&'static CStr],
    ) -> Result<Self> {
        let entry = ash::Entry::linked();

        let validation = validation && Self::validation_layer_supported(&entry)?;
        let validation_log = match validation_log {
            Some(path) if validation => Some(Box::new(ValidationLog::create(path)?)),
            _ => None,
        };
        let user_data = validation_log
            .as_deref()
            .map_or(std::ptr::null_mut(), |log| std::ptr::from_ref(log).cast_mut().cast::<c_void>());

        let instance = Self::create_instance(
            &entry,
            window,
            validation,
            user_data,
            api_version,
            extra_extensions,
        )?;

        let debug_utils = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = debug_utils_messenger_create_info(user_data);
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(err) => {
                    unsafe {
                        instance.destroy_instance(None);
                    }
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            _validation_log: validation_log,
        })
    }

    pub fn enumerate_accelerators(&self) -> Result<Vec<Accelerator>> {
        device::enumerate_accelerators(&self.instance)
    }

    fn create_instance(
        entry: &ash::Entry,
        window: Option<&dyn PlatformWindow>,
        validation: bool,
        user_data: *mut c_void,
        api_version: u32,
        extra_extensions: &[&'static CStr],
    ) -> Result<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(Self::APPLICATION_NAME)
            .engine_name(Self::APPLICATION_NAME)
            .api_version(api_version);
        let enabled_layer_names = if validation {
            vec![Self::VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let enabled_extensions = Self::get_instance_extensions(
            entry,
            window,
            validation,
            extra_extensions,
        )?;
        let enabled_extension_names = enabled_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut debug_info = debug_utils_messenger_create_info(user_data);
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if validation {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let created = unsafe {
            entry.create_instance(&instance_info, None)
        };
        Ok(created.map_err(HarnessError::InstanceCreation)?)
    }

    /// Window system extensions plus the supported subset of the optional ones.
    fn get_instance_extensions(
        entry: &ash::Entry,
        window: Option<&dyn PlatformWindow>,
        validation: bool,
        extra_extensions: &[&'static CStr],
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = if let Some(window) = window {
            ash_window::enumerate_required_extensions(
                window.display_handle()?.as_raw()
            )?
                .iter()
                .map(|ext| unsafe {
                    CStr::from_ptr(*ext)
                })
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        if validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        if !extra_extensions.is_empty() {
            let supported = unsafe {
                entry.enumerate_instance_extension_properties(None)?
            };
            for ext in extra_extensions {
                let is_supported = supported
                    .iter()
                    .any(|props| props.extension_name_as_c_str() == Ok(*ext));
                if !is_supported {
                    log::warn!("Enabled instance extension {:?} is not present at instance level", ext);
                } else if !exts.contains(ext) {
                    exts.push(*ext);
                }
            }
        }

        Ok(exts)
    }

    fn validation_layer_supported(entry: &ash::Entry) -> Result<bool> {
        let supported_layers = unsafe {
            entry.enumerate_instance_layer_properties()?
        };
        let supported = supported_layers
            .iter()
            .any(|props| props.layer_name_as_c_str() == Ok(Self::VALIDATION_LAYER));

        if !supported {
            log::warn!(
                "Validation layer {:?} not present, validation is disabled",
                Self::VALIDATION_LAYER
            );
        }

        Ok(supported)
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Validation messages mirrored into a text file
pub struct ValidationLog {
    out: Mutex<BufWriter<File>>,
}

impl ValidationLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .wrap_err_with(|| format!("Could not create {}", path.display()))?;
        log::info!("Writing validation messages to {}", path.display());
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Flushed per line, a crash right after a message must not lose it.
    pub fn write_line(&self, line: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(err) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            log::warn!("Failed to write validation message: {}", err);
        }
    }
}

fn debug_utils_messenger_create_info(
    user_data: *mut c_void,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
        .user_data(user_data)
}

fn severity_label(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &'static str {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => "[Verbose]",
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => "[Info]",
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => "[Warning]",
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => "[Error]",
        _ => "[Unknown]",
    }
}

fn format_message(
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    id_number: i32,
    id_name: Option<&CStr>,
    message: &CStr,
) -> String {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let message = message.to_string_lossy();
    match id_name {
        Some(name) => format!("{} [{}][{}] : {}", msg_type, id_number, name.to_string_lossy(), message),
        None => format!("{} [{}] : {}", msg_type, id_number, message),
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    let (id_number, id_name, msg) = unsafe {
        match p_callback_data.as_ref() {
            Some(data) => (
                data.message_id_number,
                (!data.p_message_id_name.is_null()).then(|| CStr::from_ptr(data.p_message_id_name)),
                if data.p_message.is_null() {
                    c"<no message>"
                } else {
                    CStr::from_ptr(data.p_message)
                },
            ),
            None => (0, None, c"<no message>"),
        }
    };
    let body = format_message(message_type, id_number, id_name, msg);
    let severity = severity_label(message_severity);
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::trace!("{}{}", severity, body),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("{}{}", severity, body),
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}{}", severity, body),
        _ => log::warn!("{}{}", severity, body),
    }

    // Set only while the owning RenderInstance is alive
    if let Some(validation_log) = unsafe { p_user_data.cast::<ValidationLog>().as_ref() } {
        validation_log.write_line(&format!("{}{}", severity, body));
    }

    // The call that triggered the message is never aborted
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_id_and_name() {
        let line = format_message(
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            -42,
            Some(c"VUID-vkCmdDraw-None-02859"),
            c"Render pass is not active",
        );
        assert_eq!(line, "[Validation] [-42][VUID-vkCmdDraw-None-02859] : Render pass is not active");

        let line = format_message(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL, 0, None, c"Loader message");
        assert_eq!(line, "[General] [0] : Loader message");
    }

    #[test]
    fn severity_labels() {
        assert_eq!(severity_label(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), "[Error]");
        assert_eq!(severity_label(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), "[Verbose]");
        assert_eq!(
            severity_label(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            "[Unknown]"
        );
    }

    #[test]
    fn callback_writes_to_the_validation_log() {
        let path = std::env::temp_dir().join(format!("vkframe-validation-{}.txt", std::process::id()));
        let validation_log = ValidationLog::create(&path).unwrap();
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default()
            .message_id_number(7)
            .message_id_name(c"VUID-test")
            .message(c"Something is off");

        let abort = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                std::ptr::from_ref(&validation_log).cast_mut().cast(),
            )
        };
        let callback_without_log = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        drop(validation_log);

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(abort, vk::FALSE);
        assert_eq!(callback_without_log, vk::FALSE);
        assert_eq!(text, "[Warning][Validation] [7][VUID-test] : Something is off\n");
    }
}
