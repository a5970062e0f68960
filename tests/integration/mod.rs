mod test_cpu_frequency;
mod test_session;
