use glam::{Mat4, Vec3};

fn calculate_pitch(direction: Vec3) -> f32 {
    direction.normalize().y.clamp(-1.0, 1.0).asin()
}

fn calculate_yaw(direction: Vec3) -> f32 {
    let direction = direction.normalize();
    direction.z.atan2(direction.x)
}

fn calculate_direction(pitch: f32, yaw: f32) -> Vec3 {
    Vec3::new(
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    )
}

pub struct Camera {
    position: Vec3,
    forward: Vec3,
    up: Vec3,
    world_up: Vec3,
    fov_y_deg: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
    pivot: Vec3,
}

impl Camera {
    const DEFAULT_FOV_Y_DEG: f32 = 60.0;
    const MAX_PITCH_DEG: f32 = 80.0;

    pub fn new(aspect_ratio: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 2.5),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            world_up: Vec3::Y,
            fov_y_deg: Self::DEFAULT_FOV_Y_DEG,
            aspect_ratio,
            near: 1.0,
            far: 256.0,
            pivot: Vec3::ZERO,
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn look_at(&mut self, target: Vec3) {
        if target == self.position {
            return;
        }
        self.forward = (target - self.position).normalize();
        let right = self.forward.cross(self.world_up).normalize();
        self.up = right.cross(self.forward).normalize();
    }

    /// Rotates the eye around the pivot, keeping the distance. Pitch is
    /// clamped so the camera never flips over the poles.
    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        let pivot_to_eye = self.position - self.pivot;
        let distance = pivot_to_eye.length();
        if distance == 0.0 {
            return;
        }

        let max_pitch = Self::MAX_PITCH_DEG.to_radians();
        let pitch = (calculate_pitch(pivot_to_eye) + delta_pitch).clamp(-max_pitch, max_pitch);
        let yaw = calculate_yaw(pivot_to_eye) + delta_yaw;

        self.position = self.pivot + calculate_direction(pitch, yaw) * distance;
        self.look_at(self.pivot);
    }

    /// Keeps the projection in sync with the swapchain extent. Zero sized
    /// extents leave the previous aspect ratio in place.
    pub fn update_aspect_ratio(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.aspect_ratio = width as f32 / height as f32;
    }

    pub fn get_viewproj_mat(&self) -> Mat4 {
        self.get_proj_mat() * self.get_view_mat()
    }

    pub fn get_view_mat(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn get_proj_mat(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(
            self.fov_y_deg.to_radians(),
            self.aspect_ratio,
            self.near,
            self.far,
        );
        // Vulkan clip space has y pointing down
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn get_aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn get_position(&self) -> Vec3 {
        self.position
    }

    pub fn get_forward(&self) -> Vec3 {
        self.forward
    }

    pub fn get_pivot(&self) -> Vec3 {
        self.pivot
    }
}
