use glam::Vec2;
use winit::event::MouseButton;

#[derive(Default)]
pub struct InputState {
    pub mouse_curr_pos: Vec2,
    pub mouse_prev_pos: Vec2,
    pub mouse_left_down: bool,
}

impl InputState {
    /// Stores the new cursor position and returns how far it moved.
    pub fn mouse_moved(&mut self, position: Vec2) -> Vec2 {
        self.mouse_prev_pos = self.mouse_curr_pos;
        self.mouse_curr_pos = position;
        self.mouse_curr_pos - self.mouse_prev_pos
    }

    /// Only the left button drags, the rest are ignored.
    pub fn mouse_button(&mut self, button: MouseButton, down: bool) {
        if button == MouseButton::Left {
            self.mouse_left_down = down;
        }
    }

    /// Reset the input states for the next frame.
    pub fn reset_frame(&mut self) {
        self.mouse_prev_pos = self.mouse_curr_pos;
    }

    /// Focus loss swallows button releases.
    pub fn release_all(&mut self) {
        self.mouse_left_down = false;
    }
}
