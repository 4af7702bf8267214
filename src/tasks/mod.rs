pub mod battery_task;
pub mod control_task;
pub mod parser_task;
pub mod usb_rx_task;
